// src/lib.rs

//! Course catalog crawler library.
//!
//! Crawls a server-rendered course registration site (terms, subjects,
//! section listings, section details) and reconciles what it finds into a
//! persistent catalog with stable entity identities.

pub mod error;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod source;
pub mod storage;
