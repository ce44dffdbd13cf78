use diesel::prelude::*;

use crate::schema::sync_transactions;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = sync_transactions)]
pub struct SyncTransactionRow {
    pub id: String,
    pub broadcast_status: String,
    pub p2p_status: String,
    pub sync_status: String,
    pub created_at: String,
    pub updated_at: String,
}
