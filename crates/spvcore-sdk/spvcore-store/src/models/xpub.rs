use diesel::prelude::*;

use crate::schema::xpubs;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = xpubs)]
pub struct XpubRow {
    pub id: String,
    pub current_balance: i64,
    pub created_at: String,
    pub updated_at: String,
}
