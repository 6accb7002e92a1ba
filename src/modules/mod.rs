mod core;
pub mod raid_protection;

/// A grouping of commands and event handlers
pub struct Module {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub commands: Vec<poise::Command<crate::Data, crate::Error>>,
}

/// List of enabled modules
///
/// Add to this list to create a module
pub fn enabled_modules() -> Vec<Module> {
    vec![core::module(), raid_protection::module()]
}
