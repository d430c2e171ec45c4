//! Crawler module for paced, breaker-guarded sessions
//!
//! This module contains the core session logic, including:
//! - Entry point, browser profile and delay selection
//! - HTTP fetching with retry, backoff and error classification
//! - The daily slot plan and area partition
//! - Item source and record sink collaborators
//! - Overall session coordination

mod assignment;
mod coordinator;
mod fetcher;
mod mimicry;
mod sink;

pub use assignment::{areas_for_slot, assign_areas, day_seed, Slot, SlotPlan};
pub use coordinator::{SessionScheduler, SessionTrigger};
pub use fetcher::{build_http_client, Content, FetchEngine, Target};
pub use mimicry::{BrowserProfile, DelayContext, EntryPoint, MimicryEngine};
pub use sink::{FetchedRecord, ItemSource, MemorySink, PagedAreaSource, RecordSink, SinkOutcome};
