use diesel::prelude::*;

use crate::schema::transactions;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = transactions)]
pub struct TransactionRow {
    pub id: String,
    pub draft_id: String,
    pub xpub_id: String,
    pub hex: String,
    pub tx_status: String,
    pub xpub_in_ids: String,
    pub xpub_out_ids: String,
    pub xpub_output_value: String,
    pub total_value: i64,
    pub fee: i64,
    pub number_of_inputs: i32,
    pub number_of_outputs: i32,
    pub block_hash: String,
    pub block_height: i64,
    pub merkle_path: String,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}
