//! Queue processing: push pending donations to the CRM.
//!
//! A drain runs in three phases: `collect_due_jobs` resolves queue rows
//! against local state, `push_job` does the HTTP round-trip, and
//! `apply_push_outcome` settles the result. The phases keep database access
//! out of the async sections, so the poller can hold its own connection
//! while its future stays `Send`.

use chrono::{Duration, Utc};
use log::{debug, info, warn};
use rand::RngExt;

use crate::db::{DbDonation, DbDonor, DonorDb};

use super::client::{CrmClient, CrmError};

/// Outcome of one queue drain.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub synced: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// A due queue row resolved against local state, carrying everything the
/// HTTP phase needs.
#[derive(Debug)]
pub struct PushJob {
    pub row_id: String,
    pub attempts: i32,
    pub donation: DbDonation,
    pub donor: DbDonor,
    pub donor_external_id: String,
}

/// Queue a donation for CRM push.
///
/// Returns `false` without queueing when the donor has no CRM link: we only
/// push donations the CRM can attribute, and linking the donor later
/// re-queues naturally on the next donation update.
pub fn enqueue_donation(
    db: &DonorDb,
    organization_id: &str,
    donation_id: &str,
) -> Result<bool, String> {
    let donation = db
        .get_donation(organization_id, donation_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donation not found: {donation_id}"))?;
    let donor = db
        .get_donor(organization_id, &donation.donor_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donor not found: {}", donation.donor_id))?;

    if donor.crm_external_id.is_none() {
        debug!(
            "Skipping CRM queue for donation {donation_id}: donor {} is not linked",
            donor.id
        );
        return Ok(false);
    }

    db.enqueue_sync("donation", donation_id).map_err(|e| e.to_string())?;
    Ok(true)
}

/// Resolve due queue rows into push jobs. Rows that can no longer be
/// pushed (unknown type, vanished records, unlinked donor) are settled
/// here and counted in the summary.
pub fn collect_due_jobs(
    db: &DonorDb,
    organization_id: &str,
    batch_size: u32,
) -> Result<(Vec<PushJob>, ProcessSummary), String> {
    let due = db.get_due_sync_rows(batch_size).map_err(|e| e.to_string())?;
    let mut jobs = Vec::new();
    let mut summary = ProcessSummary::default();

    for row in due {
        if row.record_type != "donation" {
            warn!("Unknown sync record type '{}' for {}", row.record_type, row.record_id);
            db.mark_sync_failed(&row.id, "unknown record type", None)
                .map_err(|e| e.to_string())?;
            summary.failed += 1;
            continue;
        }
        let Some(donation) = db
            .get_donation(organization_id, &row.record_id)
            .map_err(|e| e.to_string())?
        else {
            db.mark_sync_failed(&row.id, "donation no longer exists locally", None)
                .map_err(|e| e.to_string())?;
            summary.failed += 1;
            continue;
        };
        let Some(donor) = db
            .get_donor(organization_id, &donation.donor_id)
            .map_err(|e| e.to_string())?
        else {
            db.mark_sync_failed(&row.id, "donor no longer exists locally", None)
                .map_err(|e| e.to_string())?;
            summary.failed += 1;
            continue;
        };
        let Some(donor_external_id) = donor.crm_external_id.clone() else {
            // The link was removed after enqueue; re-linking re-queues.
            debug!("Skipping queued donation {}: donor {} is no longer linked", donation.id, donor.id);
            db.mark_sync_failed(&row.id, "donor is not linked to a CRM record", None)
                .map_err(|e| e.to_string())?;
            summary.skipped += 1;
            continue;
        };

        jobs.push(PushJob {
            row_id: row.id,
            attempts: row.attempts,
            donation,
            donor,
            donor_external_id,
        });
    }
    Ok((jobs, summary))
}

/// Push one job to the CRM. Returns the external id to persist when the
/// CRM created a new record. Before the first push of a donation, the
/// linked CRM donor is fetched and must still match the local one.
pub async fn push_job(client: &CrmClient, job: &PushJob) -> Result<Option<String>, CrmError> {
    match &job.donation.crm_external_id {
        Some(external_id) => {
            client
                .update_donation(external_id, &job.donation, &job.donor_external_id)
                .await?;
            Ok(None)
        }
        None => {
            let remote = client
                .get_donor(&job.donor_external_id)
                .await?
                .ok_or_else(|| CrmError::Api {
                    status: 422,
                    message: format!(
                        "linked CRM donor {} no longer exists",
                        job.donor_external_id
                    ),
                })?;
            if !remote.matches(&job.donor) {
                return Err(CrmError::Api {
                    status: 422,
                    message: format!(
                        "CRM donor {} does not match local donor {}",
                        remote.id, job.donor.id
                    ),
                });
            }
            let external_id = client
                .create_donation(&job.donation, &job.donor_external_id)
                .await?;
            Ok(Some(external_id))
        }
    }
}

/// Settle one push outcome back into the queue and donation rows.
pub fn apply_push_outcome(
    db: &DonorDb,
    organization_id: &str,
    job: &PushJob,
    outcome: Result<Option<String>, CrmError>,
    summary: &mut ProcessSummary,
) -> Result<(), String> {
    match outcome {
        Ok(created) => {
            if let Some(external_id) = &created {
                db.set_donation_crm_external_id(organization_id, &job.donation.id, external_id)
                    .map_err(|e| e.to_string())?;
                info!("Created CRM donation {external_id} from {}", job.donation.id);
            } else {
                debug!("Updated CRM donation from {}", job.donation.id);
            }
            db.mark_sync_synced(&job.row_id).map_err(|e| e.to_string())?;
            summary.synced += 1;
        }
        Err(err) if err.is_retryable() => {
            let next = (Utc::now() + backoff_delay(job.attempts)).to_rfc3339();
            warn!(
                "CRM push for {} failed (attempt {}), retrying after {next}: {err}",
                job.donation.id,
                job.attempts + 1
            );
            db.mark_sync_failed(&job.row_id, &err.to_string(), Some(&next))
                .map_err(|e| e.to_string())?;
            summary.failed += 1;
        }
        Err(err) => {
            warn!("CRM push for {} failed permanently: {err}", job.donation.id);
            db.mark_sync_failed(&job.row_id, &err.to_string(), None)
                .map_err(|e| e.to_string())?;
            summary.failed += 1;
        }
    }
    Ok(())
}

/// Drain due queue rows once, retrying retryable failures with backoff.
pub async fn process_due(
    db: &DonorDb,
    client: &CrmClient,
    organization_id: &str,
    batch_size: u32,
) -> Result<ProcessSummary, String> {
    let (jobs, mut summary) = collect_due_jobs(db, organization_id, batch_size)?;
    for job in jobs {
        let outcome = push_job(client, &job).await;
        apply_push_outcome(db, organization_id, &job, outcome, &mut summary)?;
    }
    Ok(summary)
}

/// Exponential backoff with jitter: 60s * 2^attempts, plus up to 30s.
fn backoff_delay(attempts: i32) -> Duration {
    let base = 60i64.saturating_mul(1i64 << attempts.clamp(0, 10));
    let jitter = rand::rng().random_range(0..30);
    Duration::seconds(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_donation, sample_donor, test_db};

    #[test]
    fn test_enqueue_skips_unlinked_donor() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 100.0)).unwrap();

        let queued = enqueue_donation(&db, "org1", "dn1").expect("enqueue");
        assert!(!queued);
        assert!(db.get_due_sync_rows(10).unwrap().is_empty());
    }

    #[test]
    fn test_enqueue_queues_linked_donor() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.set_donor_crm_external_id("org1", "d1", "crm-77").unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 100.0)).unwrap();

        let queued = enqueue_donation(&db, "org1", "dn1").expect("enqueue");
        assert!(queued);
        let due = db.get_due_sync_rows(10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].record_id, "dn1");
    }

    #[test]
    fn test_enqueue_missing_donation_errors() {
        let db = test_db();
        assert!(enqueue_donation(&db, "org1", "nope").is_err());
    }

    #[test]
    fn test_collect_resolves_linked_jobs() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.set_donor_crm_external_id("org1", "d1", "crm-77").unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 100.0)).unwrap();
        enqueue_donation(&db, "org1", "dn1").expect("enqueue");

        let (jobs, summary) = collect_due_jobs(&db, "org1", 10).expect("collect");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].donation.id, "dn1");
        assert_eq!(jobs[0].donor_external_id, "crm-77");
        assert_eq!(summary, ProcessSummary::default());
    }

    #[test]
    fn test_collect_settles_unpushable_rows() {
        let db = test_db();
        // Queued, but the donation row is gone.
        db.enqueue_sync("donation", "ghost").expect("enqueue");
        // Queued with an unknown record type.
        db.enqueue_sync("pledge", "x1").expect("enqueue");
        // Queued, then the donor's CRM link was removed.
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 100.0)).unwrap();
        db.enqueue_sync("donation", "dn1").expect("enqueue");

        let (jobs, summary) = collect_due_jobs(&db, "org1", 10).expect("collect");
        assert!(jobs.is_empty());
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 1);
        // All three rows were settled, nothing remains due.
        assert!(db.get_due_sync_rows(10).unwrap().is_empty());
    }

    #[test]
    fn test_apply_created_outcome_persists_external_id() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.set_donor_crm_external_id("org1", "d1", "crm-77").unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 100.0)).unwrap();
        enqueue_donation(&db, "org1", "dn1").expect("enqueue");
        let (mut jobs, mut summary) = collect_due_jobs(&db, "org1", 10).expect("collect");
        let job = jobs.pop().expect("job");

        apply_push_outcome(&db, "org1", &job, Ok(Some("crm-d-9".to_string())), &mut summary)
            .expect("apply");

        assert_eq!(summary.synced, 1);
        let donation = db.get_donation("org1", "dn1").unwrap().unwrap();
        assert_eq!(donation.crm_external_id.as_deref(), Some("crm-d-9"));
        assert!(db.get_due_sync_rows(10).unwrap().is_empty());
        assert_eq!(db.sync_queue_counts().unwrap(), vec![("synced".to_string(), 1)]);
    }

    #[test]
    fn test_apply_retryable_failure_reschedules() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.set_donor_crm_external_id("org1", "d1", "crm-77").unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 100.0)).unwrap();
        enqueue_donation(&db, "org1", "dn1").expect("enqueue");
        let (mut jobs, mut summary) = collect_due_jobs(&db, "org1", 10).expect("collect");
        let job = jobs.pop().expect("job");

        let outcome = Err(CrmError::Api { status: 503, message: "busy".to_string() });
        apply_push_outcome(&db, "org1", &job, outcome, &mut summary).expect("apply");

        assert_eq!(summary.failed, 1);
        // Rescheduled in the future, so not due yet but still pending.
        assert!(db.get_due_sync_rows(10).unwrap().is_empty());
        assert_eq!(db.sync_queue_counts().unwrap(), vec![("pending".to_string(), 1)]);
    }

    #[test]
    fn test_apply_permanent_failure_marks_failed() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.set_donor_crm_external_id("org1", "d1", "crm-77").unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 100.0)).unwrap();
        enqueue_donation(&db, "org1", "dn1").expect("enqueue");
        let (mut jobs, mut summary) = collect_due_jobs(&db, "org1", 10).expect("collect");
        let job = jobs.pop().expect("job");

        let outcome = Err(CrmError::Api { status: 422, message: "bad payload".to_string() });
        apply_push_outcome(&db, "org1", &job, outcome, &mut summary).expect("apply");

        assert_eq!(summary.failed, 1);
        assert_eq!(db.sync_queue_counts().unwrap(), vec![("failed".to_string(), 1)]);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let first = backoff_delay(0).num_seconds();
        let fourth = backoff_delay(3).num_seconds();
        assert!((60..90).contains(&first));
        assert!((480..510).contains(&fourth));
    }
}
