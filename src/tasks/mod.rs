pub mod sweep_windows;
pub mod taskcat;
