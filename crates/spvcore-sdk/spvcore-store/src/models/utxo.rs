use diesel::prelude::*;

use crate::schema::utxos;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = utxos)]
pub struct UtxoRow {
    pub transaction_id: String,
    pub output_index: i32,
    pub xpub_id: String,
    pub satoshis: i64,
    pub script_pub_key: String,
    pub draft_id: Option<String>,
    pub spending_tx_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}
