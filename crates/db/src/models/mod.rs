pub mod block;
pub mod opportunity;
pub mod program;
pub mod program_pathway;
pub mod referral_link;
pub mod referral_link_usage;
pub mod user;
