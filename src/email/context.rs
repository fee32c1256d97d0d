//! Context assembly for email drafting.
//!
//! The prompt block is byte-capped: donor notes and research summaries can
//! be arbitrarily long, and an unbounded paste of them is the easiest way
//! to blow a context window.

use crate::db::{DbDonor, DbOrganization, DbStaff, DonorDb, DonorStats};
use crate::services::stats::donor_stats_for;

/// Upper bound on the rendered context block, in bytes.
const MAX_CONTEXT_BYTES: usize = 6000;
/// Recent donations included, newest first.
const DONATION_LIMIT: u32 = 10;
/// Prior communications included, newest first.
const HISTORY_LIMIT: u32 = 5;

/// Everything the drafting prompt knows about a donor.
#[derive(Debug)]
pub struct EmailContext {
    pub donor: DbDonor,
    pub stats: DonorStats,
    pub organization: Option<DbOrganization>,
    /// The staff member assigned to the donor, when one is set; the draft
    /// signs off as them.
    pub sender: Option<DbStaff>,
    /// Rendered prompt block, already capped.
    pub prompt_block: String,
}

pub fn build_email_context(
    db: &DonorDb,
    organization_id: &str,
    donor_id: &str,
) -> Result<EmailContext, String> {
    let donor = db
        .get_donor(organization_id, donor_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donor not found: {donor_id}"))?;
    let stats = donor_stats_for(db, organization_id, donor_id)?;
    let organization = db.get_organization(organization_id).map_err(|e| e.to_string())?;
    let sender = match &donor.assigned_staff_id {
        Some(staff_id) => db.get_staff(organization_id, staff_id).map_err(|e| e.to_string())?,
        None => None,
    };
    let donations = db
        .get_donations_for_donor(organization_id, donor_id, DONATION_LIMIT)
        .map_err(|e| e.to_string())?;
    let history = db
        .get_communications_for_donor(organization_id, donor_id, HISTORY_LIMIT)
        .map_err(|e| e.to_string())?;

    let mut block = String::new();
    if let Some(org) = &organization {
        block.push_str(&format!("Organization: {}", org.name));
        if let Some(country) = &org.country {
            block.push_str(&format!(" ({country})"));
        }
        block.push_str(&format!(", reports in {}\n", org.currency));
    }
    if let Some(staff) = &sender {
        block.push_str(&format!("Sender: {}", staff.name));
        if let Some(role) = &staff.role {
            block.push_str(&format!(", {role}"));
        }
        block.push('\n');
    }
    block.push_str(&format!("Donor: {} ({})\n", donor.name, donor.donor_type));
    block.push_str(&format!("Status: {}\n", donor.status));
    if let (Some(city), Some(country)) = (&donor.city, &donor.country) {
        block.push_str(&format!("Location: {city}, {country}\n"));
    }
    block.push_str(&format!(
        "Giving: {} donation(s) totalling {:.2}",
        stats.donation_count, stats.total_amount
    ));
    if let Some(last) = &stats.last_donation_at {
        block.push_str(&format!(", most recent on {last}"));
    }
    block.push('\n');
    for slice in &stats.by_project {
        block.push_str(&format!(
            "  - {}: {:.2} across {} donation(s)\n",
            slice.project_name, slice.total_amount, slice.donation_count
        ));
    }
    if !donations.is_empty() {
        block.push_str("Recent donations (newest first):\n");
        for donation in &donations {
            block.push_str(&format!(
                "  - {}: {:.2} {} ({})\n",
                donation.donation_date, donation.amount, donation.currency, donation.status
            ));
        }
    }
    if let Some(capacity) = &donor.giving_capacity {
        block.push_str(&format!("Estimated giving capacity: {capacity}\n"));
    }
    if let Some(interests) = &donor.interests {
        block.push_str(&format!("Interests: {interests}\n"));
    }
    if let Some(summary) = &donor.research_summary {
        block.push_str("Research summary:\n");
        block.push_str(summary);
        block.push('\n');
    }
    if let Some(notes) = &donor.notes {
        block.push_str("Staff notes:\n");
        block.push_str(notes);
        block.push('\n');
    }
    if !history.is_empty() {
        block.push_str("Recent communications (newest first):\n");
        for comm in &history {
            let subject = comm.subject.as_deref().unwrap_or("(no subject)");
            let summary = comm.summary.as_deref().unwrap_or("");
            block.push_str(&format!(
                "  - {} {} via {}: {subject} {summary}\n",
                comm.occurred_at, comm.direction, comm.channel
            ));
        }
    }

    Ok(EmailContext {
        donor,
        stats,
        organization,
        sender,
        prompt_block: truncate_block(block),
    })
}

/// Cap the block at `MAX_CONTEXT_BYTES` on a char boundary, marking the cut.
fn truncate_block(block: String) -> String {
    if block.len() <= MAX_CONTEXT_BYTES {
        return block;
    }
    let mut end = MAX_CONTEXT_BYTES;
    while !block.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[context truncated]", &block[..end])
}
