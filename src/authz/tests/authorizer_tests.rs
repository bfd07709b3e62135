//! Authorizer behavior: rule fallback, composition, memoization and failures

use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ui_authz::{
    predicate::{allow_all, deny_all, with_timeout, Predicate},
    Authorizer, AuthorizerConfig, AuthorizationRequest, AuthzError, Context, Directive,
    RuleMeta, RuleRegistry, Visibility,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn counting(counter: Arc<AtomicUsize>, answer: bool) -> impl Predicate {
    move |_value: Value, _meta: RuleMeta| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { anyhow::Ok(answer) }
    }
}

fn failing() -> impl Predicate {
    |_value: Value, meta: RuleMeta| async move {
        Err::<bool, anyhow::Error>(anyhow::anyhow!("backend unavailable for {}", meta.action))
    }
}

// ============================================================================
// RULE FALLBACK
// ============================================================================

#[tokio::test]
async fn test_unregistered_rule_defaults_to_false() {
    init_tracing();
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", allow_all()))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);
    let context = Context::new(json!({"id": 1}));

    assert!(!authorizer.authorize_one("post", "delete?", &context).await.unwrap());
    assert!(!authorizer.authorize_one("comment", "edit?", &context).await.unwrap());
    assert!(!Authorizer::new(RuleRegistry::empty())
        .authorize_one("anything", "at-all", &context)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_global_wildcard_answers_everything_unregistered() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let seen = Arc::clone(&seen);
        move |value: Value, meta: RuleMeta| {
            seen.lock().unwrap().push(meta.clone());
            async move { anyhow::Ok(value["flag"] == true) }
        }
    };

    let registry = RuleRegistry::builder()
        .subject("*", |r| r.action("*", recorder))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    let on = Context::new(json!({"flag": true}));
    let off = Context::new(json!({"flag": false}));

    assert!(authorizer.authorize_one("invoice", "pay?", &on).await.unwrap());
    assert!(!authorizer.authorize_one("invoice", "pay?", &off).await.unwrap());
    assert!(authorizer.authorize_one("user", "ban?", &on).await.unwrap());

    // Predicates see the requested names, not the wildcard
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], RuleMeta::new("invoice", "pay?"));
    assert_eq!(seen[2], RuleMeta::new("user", "ban?"));
}

#[tokio::test]
async fn test_post_owner_scenario() {
    let registry_for = |current_user: &'static str| {
        RuleRegistry::builder()
            .subject("post", move |r| {
                r.action("edit", move |value: Value, _meta: RuleMeta| async move {
                    anyhow::Ok(value["owner"] == current_user)
                })
                .any_action(deny_all())
            })
            .build()
            .unwrap()
    };

    let context = Context::new(json!({"owner": "alice"}));

    let as_alice = Authorizer::new(registry_for("alice"));
    assert!(as_alice.authorize_one("post", "edit", &context).await.unwrap());
    assert!(!as_alice.authorize_one("post", "delete", &Context::new(json!({}))).await.unwrap());

    let as_bob = Authorizer::new(registry_for("bob"));
    assert!(!as_bob.authorize_one("post", "edit", &context).await.unwrap());
}

// ============================================================================
// COMPOSITION
// ============================================================================

#[tokio::test]
async fn test_all_actions_must_allow() {
    let registry = RuleRegistry::builder()
        .subject("post", |r| {
            r.action("view?", allow_all())
                .action("edit?", allow_all())
                .action("delete?", deny_all())
        })
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);
    let context = Context::empty();

    assert!(authorizer.authorize_all("post", &["view?", "edit?"], &context).await.unwrap());
    assert!(!authorizer.authorize_all("post", &["view?", "delete?"], &context).await.unwrap());
    assert!(!authorizer.authorize_all("post", &["delete?", "view?"], &context).await.unwrap());
}

#[tokio::test]
async fn test_empty_action_set_is_allowed() {
    // Vacuous truth: no actions means nothing to deny
    let authorizer = Authorizer::new(RuleRegistry::empty());
    let none: [&str; 0] = [];

    assert!(authorizer.authorize_all("post", &none, &Context::empty()).await.unwrap());
    assert!(authorizer.authorize(&AuthorizationRequest::new("post")).await.unwrap());
}

#[tokio::test]
async fn test_authorize_request() {
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", allow_all()).action("publish?", deny_all()))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    let editable = AuthorizationRequest::new("post").with_action("edit?");
    let publishable = editable.clone().with_action("publish?");

    assert!(authorizer.authorize(&editable).await.unwrap());
    assert!(!authorizer.authorize(&publishable).await.unwrap());
}

// ============================================================================
// MEMOIZATION
// ============================================================================

#[tokio::test]
async fn test_repeated_check_invokes_predicate_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", counting(Arc::clone(&calls), true)))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);
    let context = Context::new(json!({"id": 9}));

    assert!(authorizer.authorize_one("post", "edit?", &context).await.unwrap());
    assert!(authorizer.authorize_one("post", "edit?", &context).await.unwrap());
    assert!(authorizer.authorize_all("post", &["edit?"], &context).await.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(authorizer.cache_stats().unwrap().hits, 2);
}

#[tokio::test]
async fn test_cached_false_is_not_a_miss() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", counting(Arc::clone(&calls), false)))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    for _ in 0..3 {
        assert!(!authorizer.authorize_one("post", "edit?", &Context::empty()).await.unwrap());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_distinct_values_get_distinct_entries() {
    let per_value: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let recorder = {
        let per_value = Arc::clone(&per_value);
        move |value: Value, _meta: RuleMeta| {
            *per_value
                .lock()
                .unwrap()
                .entry(value["owner"].to_string())
                .or_default() += 1;
            async move { anyhow::Ok(value["owner"] == "alice") }
        }
    };

    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", recorder))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    let alice = Context::new(json!({"owner": "alice", "title": "a"})).with_cache_keys(["owner"]);
    let alice_other_title =
        Context::new(json!({"owner": "alice", "title": "b"})).with_cache_keys(["owner"]);
    let bob = Context::new(json!({"owner": "bob", "title": "a"})).with_cache_keys(["owner"]);

    assert!(authorizer.authorize_one("post", "edit?", &alice).await.unwrap());
    assert!(!authorizer.authorize_one("post", "edit?", &bob).await.unwrap());
    // Unprojected field differs: served from alice's entry
    assert!(authorizer.authorize_one("post", "edit?", &alice_other_title).await.unwrap());
    assert!(authorizer.authorize_one("post", "edit?", &alice).await.unwrap());

    let per_value = per_value.lock().unwrap();
    assert_eq!(per_value.get("\"alice\""), Some(&1));
    assert_eq!(per_value.get("\"bob\""), Some(&1));
    assert_eq!(authorizer.cache_stats().unwrap().entries, 2);
}

#[tokio::test]
async fn test_disabling_cache_does_not_change_outcomes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let build = |calls: &Arc<AtomicUsize>| {
        RuleRegistry::builder()
            .subject("post", |r| {
                r.action("edit?", counting(Arc::clone(calls), true))
                    .action("delete?", deny_all())
            })
            .build()
            .unwrap()
    };

    let cached = Authorizer::new(build(&calls));
    let uncached = Authorizer::with_config(
        build(&calls),
        AuthorizerConfig {
            enable_cache: false,
            ..Default::default()
        },
    );

    for actions in [vec!["edit?"], vec!["delete?"], vec!["edit?", "delete?"], vec![]] {
        for _ in 0..2 {
            assert_eq!(
                cached.authorize_all("post", &actions, &Context::empty()).await.unwrap(),
                uncached.authorize_all("post", &actions, &Context::empty()).await.unwrap(),
            );
        }
    }
}

#[tokio::test]
async fn test_invalidate_cache_forces_reevaluation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", counting(Arc::clone(&calls), true)))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    authorizer.authorize_one("post", "edit?", &Context::empty()).await.unwrap();
    authorizer.invalidate_cache();
    authorizer.authorize_one("post", "edit?", &Context::empty()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_predicate_failure_propagates() {
    init_tracing();
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", allow_all()).action("publish?", failing()))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    let err = authorizer
        .authorize_all("post", &["edit?", "publish?"], &Context::empty())
        .await
        .unwrap_err();

    assert!(err.is_predicate_failure());
    match err {
        AuthzError::PredicateFailed { subject, action, source } => {
            assert_eq!(subject, "post");
            assert_eq!(action, "publish?");
            assert!(source.to_string().contains("backend unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // A failure is not a denial and is never cached
    assert!(authorizer
        .authorize_one("post", "publish?", &Context::empty())
        .await
        .is_err());
}

#[tokio::test]
async fn test_successful_siblings_cached_despite_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| {
            r.action("edit?", counting(Arc::clone(&calls), true))
                .action("publish?", failing())
        })
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    assert!(authorizer
        .authorize_all("post", &["edit?", "publish?"], &Context::empty())
        .await
        .is_err());
    assert!(authorizer.authorize_one("post", "edit?", &Context::empty()).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let metrics = authorizer.get_metrics().await.unwrap();
    assert_eq!(metrics.predicate_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_wrapper_surfaces_as_failure() {
    let stalled = |_value: Value, _meta: RuleMeta| async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        anyhow::Ok(true)
    };
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", with_timeout(Duration::from_millis(100), stalled)))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);

    let outcome = authorizer.authorize_one("post", "edit?", &Context::empty()).await;
    assert!(matches!(outcome, Err(AuthzError::PredicateFailed { .. })));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

fn slow_counting(counter: Arc<AtomicUsize>) -> impl Predicate {
    move |_value: Value, _meta: RuleMeta| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            anyhow::Ok(true)
        }
    }
}

#[tokio::test]
async fn test_concurrent_identical_checks_race_without_dedup() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", slow_counting(Arc::clone(&calls))))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);
    let context = Context::empty();

    let results = join_all((0..5).map(|_| authorizer.authorize_one("post", "edit?", &context))).await;

    assert!(results.into_iter().all(|r| r.unwrap()));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(authorizer.cache_stats().unwrap().entries, 1);
}

#[tokio::test]
async fn test_concurrent_identical_checks_share_invocation_with_dedup() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", slow_counting(Arc::clone(&calls))))
        .build()
        .unwrap();
    let config = AuthorizerConfig {
        dedup_in_flight: true,
        ..Default::default()
    };
    let authorizer = Authorizer::with_config(registry, config);
    let context = Context::empty();

    let results = join_all((0..5).map(|_| authorizer.authorize_one("post", "edit?", &context))).await;

    assert!(results.into_iter().all(|r| r.unwrap()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Later checks hit the cache
    assert!(authorizer.authorize_one("post", "edit?", &context).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dedup_without_cache_shares_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", slow_counting(Arc::clone(&calls))))
        .build()
        .unwrap();
    let config = AuthorizerConfig {
        enable_cache: false,
        dedup_in_flight: true,
        ..Default::default()
    };
    let authorizer = Authorizer::with_config(registry, config);
    let context = Context::empty();

    let results = join_all((0..5).map(|_| authorizer.authorize_one("post", "edit?", &context))).await;

    assert!(results.into_iter().all(|r| r.unwrap()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Nothing is memoized, so a later check invokes again
    assert!(authorizer.authorize_one("post", "edit?", &context).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dedup_failure_retried_by_each_waiter() {
    let calls = Arc::new(AtomicUsize::new(0));
    let failing_slowly = {
        let calls = Arc::clone(&calls);
        move |_value: Value, _meta: RuleMeta| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<bool, anyhow::Error>(anyhow::anyhow!("backend unavailable"))
            }
        }
    };
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", failing_slowly))
        .build()
        .unwrap();
    let config = AuthorizerConfig {
        dedup_in_flight: true,
        ..Default::default()
    };
    let authorizer = Authorizer::with_config(registry, config);
    let context = Context::empty();

    let start = tokio::time::Instant::now();
    let results = join_all((0..5).map(|_| authorizer.authorize_one("post", "edit?", &context))).await;

    assert!(results.iter().all(|r| r.as_ref().is_err_and(|e| e.is_predicate_failure())));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    // Retries run one after another, not in parallel
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(authorizer.cache_stats().unwrap().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_configure_during_pending_check_leaves_no_stale_entry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let allow = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", slow_counting(Arc::clone(&calls))))
        .build()
        .unwrap();
    let deny = RuleRegistry::builder()
        .subject("post", |r| r.action("edit?", deny_all()))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(allow);
    let context = Context::empty();

    let (pending, ()) = tokio::join!(authorizer.authorize_one("post", "edit?", &context), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        authorizer.configure(deny);
    });

    // The caller still gets the answer of the rule it invoked
    assert!(pending.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(authorizer.cache_stats().unwrap().entries, 0);

    assert!(!authorizer.authorize_one("post", "edit?", &context).await.unwrap());
    assert_eq!(authorizer.cache_stats().unwrap().entries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_across_tasks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = RuleRegistry::builder()
        .subject("post", |r| r.action("view?", counting(Arc::clone(&calls), true)))
        .build()
        .unwrap();
    let authorizer = Arc::new(Authorizer::new(registry));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let authorizer = Arc::clone(&authorizer);
            tokio::spawn(async move {
                let context = Context::new(json!({"id": i % 2}));
                authorizer.authorize_one("post", "view?", &context).await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    assert_eq!(authorizer.cache_stats().unwrap().entries, 2);
    assert!(calls.load(Ordering::SeqCst) >= 2);
}

// ============================================================================
// DECLARATIONS
// ============================================================================

#[tokio::test]
async fn test_directive_evaluation_and_visibility() {
    let registry = RuleRegistry::builder()
        .subject("post", |r| {
            r.action("edit?", allow_all())
                .action("publish?", deny_all())
                .action("archive?", failing())
        })
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);
    let context = Context::empty();

    let edit: Directive = "post:edit?".parse().unwrap();
    let publish: Directive = "post:edit?.publish?".parse().unwrap();
    let archive: Directive = "post:archive?".parse().unwrap();

    let outcome = authorizer.evaluate_directive(&edit, &context).await;
    assert_eq!(Visibility::from_outcome(&outcome), Visibility::Visible);

    let outcome = authorizer.evaluate_directive(&publish, &context).await;
    assert_eq!(Visibility::from_outcome(&outcome), Visibility::Hidden);

    let outcome = authorizer.evaluate_directive(&archive, &context).await;
    assert!(outcome.is_err());
    assert_eq!(Visibility::from_outcome(&outcome), Visibility::Hidden);
}

#[tokio::test]
async fn test_directive_without_subject_uses_wildcard_rules() {
    let registry = RuleRegistry::builder()
        .subject("*", |r| r.action("edit?", allow_all()))
        .build()
        .unwrap();
    let authorizer = Authorizer::new(registry);
    let context = Context::empty();

    let directive: Directive = ":edit?".parse().unwrap();
    assert_eq!(directive.subject, "*");
    assert!(authorizer.evaluate_directive(&directive, &context).await.unwrap());

    let directive: Directive = ":delete?".parse().unwrap();
    assert!(!authorizer.evaluate_directive(&directive, &context).await.unwrap());
}
