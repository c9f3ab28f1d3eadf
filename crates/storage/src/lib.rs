pub mod db;

pub use db::{
    create_db, delete_local_override, get_fx_table, get_goals, get_local_overrides,
    get_merchant_rules, get_recipients, get_recurring_items, get_server_next_salary,
    get_sync_watermark, get_transactions, get_user_context, replace_fx_rates, replace_goals,
    replace_merchant_rules, replace_recipients, replace_recurring_items, replace_transactions,
    replace_user_context, save_local_override, set_server_next_salary, set_sync_watermark, DbPool,
    StorageError,
};
