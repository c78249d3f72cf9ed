//! Admission control: operation registry, availability policy and strategy
//! tuning.

mod controller;
mod operation;

pub use controller::{
    AdmissionConfig, AdmissionTicket, AdmissionUsage, ResourceAdmissionController,
    StrategyDecision,
};
pub use operation::{Operation, OperationKind, Priority};
