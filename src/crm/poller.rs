//! Background CRM sync poller.
//!
//! Runs on its own interval and also wakes immediately when a donation
//! changes (`AppState::sync_wake`). The poller owns a dedicated database
//! connection so it never contends with foreground commands for the shared
//! handle; WAL mode makes the concurrent access safe.
//!
//! The drain phases are called individually here instead of through
//! `sync::process_due`: no `&DonorDb` may be live across an await, or the
//! future stops being `Send` and `tokio::spawn` rejects it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use crate::db::DonorDb;
use crate::state::AppState;

use super::client::CrmClient;
use super::sync;

const STARTUP_DELAY_SECS: u64 = 30;

pub async fn run_crm_sync_poller(state: Arc<AppState>) {
    // Let startup settle before the first network round-trip.
    tokio::time::sleep(Duration::from_secs(STARTUP_DELAY_SECS)).await;

    let db = match DonorDb::open() {
        Ok(db) => db,
        Err(e) => {
            error!("CRM sync poller could not open database: {e}");
            return;
        }
    };
    info!("CRM sync poller started");

    loop {
        let interval = match cycle_setup(&state) {
            CycleSetup::Idle(interval) => interval,
            CycleSetup::Drain { client, organization_id, batch_size, interval } => {
                match sync::collect_due_jobs(&db, &organization_id, batch_size) {
                    Ok((jobs, mut summary)) => {
                        for job in jobs {
                            let outcome = sync::push_job(&client, &job).await;
                            if let Err(e) = sync::apply_push_outcome(
                                &db,
                                &organization_id,
                                &job,
                                outcome,
                                &mut summary,
                            ) {
                                error!("CRM sync bookkeeping failed for {}: {e}", job.donation.id);
                            }
                        }
                        if summary.synced > 0 || summary.failed > 0 {
                            info!(
                                "CRM sync cycle: {} synced, {} failed",
                                summary.synced, summary.failed
                            );
                        }
                    }
                    Err(e) => error!("CRM sync cycle failed: {e}"),
                }
                interval
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            _ = state.sync_wake.notified() => {
                debug!("CRM sync poller woken early");
            }
        }
    }
}

enum CycleSetup {
    Idle(u64),
    Drain {
        client: CrmClient,
        organization_id: String,
        batch_size: u32,
        interval: u64,
    },
}

/// Decide whether this cycle drains and with what client.
fn cycle_setup(state: &AppState) -> CycleSetup {
    let config = match state.get_config() {
        Ok(config) => config,
        Err(e) => {
            debug!("CRM sync poller idle: {e}");
            return CycleSetup::Idle(STARTUP_DELAY_SECS);
        }
    };
    let interval = config.sync.poll_interval_seconds.max(30);

    if !config.crm.enabled {
        return CycleSetup::Idle(interval);
    }
    match CrmClient::new(&config.crm) {
        Ok(client) => CycleSetup::Drain {
            client,
            organization_id: config.organization_id,
            batch_size: config.sync.batch_size,
            interval,
        },
        Err(e) => {
            debug!("CRM sync poller idle: {e}");
            CycleSetup::Idle(interval)
        }
    }
}
