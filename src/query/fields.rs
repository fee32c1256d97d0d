//! Static field registry: the only place a DSL field name can turn into SQL.
//!
//! Each entry names the column expression, the value kind it accepts, and
//! the join it needs. Unknown fields never reach the compiler — lookups go
//! through `field_def`, and the error path lists what would have been
//! allowed.

use super::plan::QueryKind;

/// What kind of literal a field compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Number,
    Date,
    Bool,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Date => "date",
            ValueKind::Bool => "bool",
        }
    }
}

/// Joins a field can require. Ordering is the emission order in compiled SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JoinId {
    Donor,
    Project,
    Staff,
    Donations,
}

pub struct FieldDef {
    /// Name on the DSL surface (camelCase, matching the serde surface).
    pub name: &'static str,
    /// SQL expression the field resolves to.
    pub expr: &'static str,
    pub kind: ValueKind,
    pub join: Option<JoinId>,
    /// Aggregate expression over joined donations; predicate goes to HAVING.
    pub computed: bool,
}

const DONOR_FIELDS: &[FieldDef] = &[
    FieldDef { name: "name", expr: "d.name", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "email", expr: "d.email", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "phone", expr: "d.phone", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "status", expr: "d.status", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "donorType", expr: "d.donor_type", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "city", expr: "d.city", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "country", expr: "d.country", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "createdAt", expr: "d.created_at", kind: ValueKind::Date, join: None, computed: false },
    FieldDef { name: "assignedStaffName", expr: "s.name", kind: ValueKind::Text, join: Some(JoinId::Staff), computed: false },
    FieldDef { name: "totalDonated", expr: "COALESCE(SUM(dn.amount), 0)", kind: ValueKind::Number, join: Some(JoinId::Donations), computed: true },
    FieldDef { name: "donationCount", expr: "COUNT(dn.id)", kind: ValueKind::Number, join: Some(JoinId::Donations), computed: true },
    FieldDef { name: "lastDonationAt", expr: "MAX(dn.donation_date)", kind: ValueKind::Date, join: Some(JoinId::Donations), computed: true },
];

const DONATION_FIELDS: &[FieldDef] = &[
    FieldDef { name: "amount", expr: "dn.amount", kind: ValueKind::Number, join: None, computed: false },
    FieldDef { name: "currency", expr: "dn.currency", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "donationDate", expr: "dn.donation_date", kind: ValueKind::Date, join: None, computed: false },
    FieldDef { name: "status", expr: "dn.status", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "paymentMethod", expr: "dn.payment_method", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "recurring", expr: "dn.recurring", kind: ValueKind::Bool, join: None, computed: false },
    FieldDef { name: "donorId", expr: "dn.donor_id", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "projectId", expr: "dn.project_id", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "donorName", expr: "d.name", kind: ValueKind::Text, join: Some(JoinId::Donor), computed: false },
    FieldDef { name: "projectName", expr: "p.name", kind: ValueKind::Text, join: Some(JoinId::Project), computed: false },
];

const PROJECT_FIELDS: &[FieldDef] = &[
    FieldDef { name: "name", expr: "p.name", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "status", expr: "p.status", kind: ValueKind::Text, join: None, computed: false },
    FieldDef { name: "goalAmount", expr: "p.goal_amount", kind: ValueKind::Number, join: None, computed: false },
    FieldDef { name: "startDate", expr: "p.start_date", kind: ValueKind::Date, join: None, computed: false },
    FieldDef { name: "endDate", expr: "p.end_date", kind: ValueKind::Date, join: None, computed: false },
    FieldDef { name: "createdAt", expr: "p.created_at", kind: ValueKind::Date, join: None, computed: false },
];

pub fn defs(kind: QueryKind) -> &'static [FieldDef] {
    match kind {
        QueryKind::Donors => DONOR_FIELDS,
        QueryKind::Donations => DONATION_FIELDS,
        QueryKind::Projects => PROJECT_FIELDS,
    }
}

/// Resolve a DSL field name for a query kind.
pub fn field_def(kind: QueryKind, name: &str) -> Option<&'static FieldDef> {
    defs(kind).iter().find(|f| f.name == name)
}

/// Comma-joined allowed field names, for error messages and prompts.
pub fn allowed_fields(kind: QueryKind) -> String {
    defs(kind)
        .iter()
        .map(|f| f.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// FROM clause base table with its alias.
pub fn base_clause(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Donors => "donors d",
        QueryKind::Donations => "donations dn",
        QueryKind::Projects => "projects p",
    }
}

/// Alias used for `organization_id` scoping on the base table.
pub fn base_alias(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Donors => "d",
        QueryKind::Donations => "dn",
        QueryKind::Projects => "p",
    }
}

/// JOIN clause for a join id within a query kind.
pub fn join_sql(kind: QueryKind, join: JoinId) -> &'static str {
    match (kind, join) {
        (QueryKind::Donors, JoinId::Staff) => "LEFT JOIN staff s ON s.id = d.assigned_staff_id",
        (QueryKind::Donors, JoinId::Donations) => "LEFT JOIN donations dn ON dn.donor_id = d.id",
        (QueryKind::Donations, JoinId::Donor) => "JOIN donors d ON d.id = dn.donor_id",
        (QueryKind::Donations, JoinId::Project) => "LEFT JOIN projects p ON p.id = dn.project_id",
        // The registry never pairs other combinations.
        _ => unreachable!("join not defined for this query kind"),
    }
}

/// Plain (non-computed) projection for a query kind.
pub fn projection(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Donors => {
            "d.id, d.name, d.email, d.status, d.donor_type, d.city, d.country, d.created_at"
        }
        QueryKind::Donations => {
            "dn.id, dn.amount, dn.currency, dn.donation_date, dn.status, \
             dn.payment_method, dn.recurring, d.name AS donor_name, p.name AS project_name"
        }
        QueryKind::Projects => {
            "p.id, p.name, p.status, p.goal_amount, p.start_date, p.end_date"
        }
    }
}

/// Extra aggregate columns added to the donor projection when the query
/// groups over joined donations.
pub const DONOR_COMPUTED_PROJECTION: &str =
    "COALESCE(SUM(dn.amount), 0) AS total_donated, \
     COUNT(dn.id) AS donation_count, \
     MAX(dn.donation_date) AS last_donation_at";

/// Joins the donations projection always needs (donor and project names).
pub const DONATION_BASE_JOINS: &[JoinId] = &[JoinId::Donor, JoinId::Project];

/// Human-readable registry summary handed to the structured engine's prompt.
pub fn registry_summary() -> String {
    let mut out = String::new();
    for kind in [QueryKind::Donors, QueryKind::Donations, QueryKind::Projects] {
        out.push_str(kind.as_str());
        out.push_str(": ");
        let cols: Vec<String> = defs(kind)
            .iter()
            .map(|f| format!("{} ({})", f.name, f.kind.as_str()))
            .collect();
        out.push_str(&cols.join(", "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup() {
        let def = field_def(QueryKind::Donors, "totalDonated").expect("known field");
        assert!(def.computed);
        assert_eq!(def.kind, ValueKind::Number);

        assert!(field_def(QueryKind::Donors, "total_donated").is_none());
        assert!(field_def(QueryKind::Projects, "amount").is_none());
    }

    #[test]
    fn test_allowed_fields_lists_every_name() {
        let allowed = allowed_fields(QueryKind::Donations);
        assert!(allowed.contains("donorName"));
        assert!(allowed.contains("projectId"));
    }

    #[test]
    fn test_registry_summary_covers_all_kinds() {
        let summary = registry_summary();
        assert!(summary.contains("donors:"));
        assert!(summary.contains("donations:"));
        assert!(summary.contains("projects:"));
        assert!(summary.contains("totalDonated (number)"));
    }
}
