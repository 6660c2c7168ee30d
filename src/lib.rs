//! Clinical timeline and medication/lab lifecycle engine behind a shared
//! maternal health booklet.
//!
//! A booklet is one pregnancy record owned by one patient and shared with
//! her doctors through explicit access grants. This crate owns the rules
//! that keep a booklet's visit entries, prescribed medications, and lab
//! requests consistent over time, plus the derived computations (gestational
//! age, medication active window, dose adherence) every screen depends on.
//! Presentation, auth, and notification delivery live elsewhere.

pub mod access;
pub mod db;
pub mod labs;
pub mod medications;
pub mod models;
pub mod temporal;
pub mod timeline;
pub mod visit;
