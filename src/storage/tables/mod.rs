//! Table modules - each extends `Database` with the operations for one table.

pub mod filters; // filter_rules
pub mod mutes; // mutes
pub mod pins; // pins (highlight board reposts)
pub mod reminders; // reminders
pub mod role_bindings; // role_bindings (reaction roles)
