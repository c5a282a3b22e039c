pub mod health;
pub mod logs;
pub mod output;
pub mod supervisor;
