//! Rollout coordinator behavior with simulated tenant workers: failure
//! isolation, the admission gate bound, validation gating and the deadline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oilgas_admin::services::rollout_service::{
    execute_bounded, run_rollout, RolloutError, RolloutOptions, RolloutOutcome,
};
use oilgas_admin::tenant::TenantId;

fn tenants(n: usize) -> Vec<TenantId> {
    (0..n)
        .map(|i| TenantId::new(&format!("tenant_{i}")).unwrap())
        .collect()
}

fn options(concurrency: usize, timeout: Duration) -> RolloutOptions {
    RolloutOptions {
        concurrency,
        timeout,
    }
}

#[tokio::test]
async fn single_failure_is_isolated_to_that_tenant() {
    let set = tenants(5);
    let failing = set[2].clone();

    let worker = move |tenant: TenantId| {
        let failing = failing.clone();
        async move {
            if tenant == failing {
                Err("relation \"store.inventory\" does not exist".to_string())
            } else {
                Ok(())
            }
        }
    };

    let report = run_rollout(
        set,
        options(5, Duration::from_secs(30)),
        |_tenant| async { Ok(()) },
        worker,
    )
    .await
    .unwrap();

    assert_eq!(report.results.len(), 5);
    assert_eq!(report.successes().count(), 4);
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].tenant.as_str(), "tenant_2");
    assert!(!report.succeeded());
}

#[tokio::test]
async fn admission_gate_is_never_exceeded() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let worker = {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        move |_tenant: TenantId| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }
    };

    let results = execute_bounded(tenants(20), &options(5, Duration::from_secs(30)), worker).await;

    assert_eq!(results.len(), 20);
    assert!(results.iter().all(|r| r.outcome == RolloutOutcome::Success));
    assert!(
        peak.load(Ordering::SeqCst) <= 5,
        "observed {} concurrent tenant tasks",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn failed_validation_executes_zero_tenants() {
    let executed = Arc::new(AtomicUsize::new(0));

    let worker = {
        let executed = executed.clone();
        move |_tenant: TenantId| {
            let executed = executed.clone();
            async move {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    };

    let err = run_rollout(
        tenants(5),
        options(5, Duration::from_secs(30)),
        |_tenant| async { Err("syntax error at or near \"ALTRE\"".to_string()) },
        worker,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, RolloutError::Validation { .. }));
    assert_eq!(executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_tenant_set_is_a_no_op() {
    let report = run_rollout(
        Vec::new(),
        options(5, Duration::from_secs(30)),
        |_tenant| async { Err("validation must not run without tenants".to_string()) },
        |_tenant: TenantId| async { Err("worker must not run without tenants".to_string()) },
    )
    .await
    .unwrap();

    assert!(report.is_empty());
    assert!(report.succeeded());
}

#[tokio::test(start_paused = true)]
async fn tasks_past_the_deadline_report_timed_out() {
    // One permit and long-running workers: nothing can finish before the
    // rollout deadline, so every tenant must surface as timed out instead of
    // being silently dropped.
    let worker = |_tenant: TenantId| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    };

    let results = execute_bounded(tenants(3), &options(1, Duration::from_secs(1)), worker).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.outcome == RolloutOutcome::TimedOut));
}

#[tokio::test]
async fn every_tenant_appears_exactly_once_in_the_report() {
    let worker = |tenant: TenantId| async move {
        if tenant.as_str().ends_with('3') {
            Err("deadlock detected".to_string())
        } else {
            Ok(())
        }
    };

    let report = run_rollout(
        tenants(12),
        options(4, Duration::from_secs(30)),
        |_tenant| async { Ok(()) },
        worker,
    )
    .await
    .unwrap();

    let mut seen: Vec<_> = report.results.iter().map(|r| r.tenant.as_str()).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 12);
}
