pub mod compiled;
pub mod hosted;
pub mod traced;
