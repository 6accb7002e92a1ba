mod ping;
mod stats;

pub fn module() -> crate::modules::Module {
    crate::modules::Module {
        id: "core",
        name: "Core",
        description: "Basic bot health and statistics commands",
        commands: vec![ping::ping(), stats::stats()],
    }
}
