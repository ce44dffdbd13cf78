use diesel::prelude::*;

use crate::schema::destinations;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = destinations)]
pub struct DestinationRow {
    pub locking_script: String,
    pub xpub_id: String,
    pub address: String,
    pub created_at: String,
}
