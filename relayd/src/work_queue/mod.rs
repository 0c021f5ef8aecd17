// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Bounded Request Queue and Worker Pool
//!
//! ## Overview
//! - A single bounded queue decouples bus arrival rate from execution rate.
//! - Capacity is twice the worker count: bursts are absorbed, growth is not.
//! - A full queue blocks the producer (the bus link dispatch path). That is
//!   the only backpressure there is.
//! - A fixed number of worker threads drain the queue in arrival order.
//! - Stopping the queue rejects new requests but keeps handing out the ones
//!   already accepted. Workers exit once it is stopped *and* empty.
//! - Every worker holds a [`barrier::CompletionToken`]; the coordinator waits
//!   on the barrier until the last token is dropped.
//!
//! ```text
//!         +-----------------------+
//!         |   Bus link dispatch   |
//!         +-----------+-----------+
//!                     | enqueue (blocks while full)
//!                     v
//!         +-----------------------+
//!         | RequestQueue (2 x N)  |
//!         +---+-------+-------+---+
//!             |       |       |     dequeue (blocks while empty)
//!         +---v--+ +--v---+ +-v----+
//!         |  W1  | |  W2  | |  WN  |  -> backend session -> bus reply
//!         +---+--+ +--+---+ +-+----+
//!             |       |       |
//!         +---v-------v-------v---+
//!         |   CompletionBarrier   |
//!         +-----------------------+
//! ```

pub mod barrier;
pub mod pool;
pub mod queue;
pub mod request;
pub mod worker;
