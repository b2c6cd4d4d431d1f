pub mod chain;
pub mod history;
pub mod run;
pub mod skill;
