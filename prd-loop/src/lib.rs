//! Resumable loop that drives a coding agent through the stories of a PRD.
//!
//! A PRD is a JSON document of user stories, each with a `passes` flag. The
//! loop picks the next pending story, hands it to an external agent CLI, and
//! treats the story as done only once the agent itself has flipped the flag
//! in the file. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (story selection, circuit
//!   breaker, stream event decoding, hour windows). No I/O.
//! - **[`io`]**: Side-effecting operations (files under `.prd/`, the agent
//!   process, session logs). Isolated behind small seams for tests.
//!
//! Orchestration modules ([`start`], [`looping`], [`status`]) coordinate core
//! logic with I/O to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod interrupt;
pub mod io;
pub mod logging;
pub mod looping;
pub mod prd;
pub mod start;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
