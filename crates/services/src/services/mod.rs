pub mod background;
pub mod block;
pub mod config;
pub mod directory;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod link;
pub mod link_usage;
pub mod locks;
pub mod notification;
pub mod pathway_progress;
pub mod program;
pub mod reward;
pub mod validation;
