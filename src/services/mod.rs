pub mod ads;
pub mod collaborators;
pub mod dispatcher;
pub mod inference;
pub mod ledger;
pub mod manifest;
pub mod pipeline;
pub mod queue;
pub mod retention;
pub mod stages;
pub mod storage;
pub mod worker;
