use diesel::prelude::*;

use crate::schema::draft_transactions;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = draft_transactions)]
pub struct DraftRow {
    pub id: String,
    pub xpub_id: String,
    /// JSON of the spending plan.
    pub configuration: String,
    pub status: String,
    pub hex: String,
    pub expires_at: String,
    pub final_tx_id: Option<String>,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}
