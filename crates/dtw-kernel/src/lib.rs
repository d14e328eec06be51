//! Discrete-event simulation kernel.
//!
//! An [`Environment`] owns a virtual clock and a single-threaded executor for
//! simulation processes written as `async` blocks. Processes suspend on
//! [`Timeout`]s, [`Resource`] slots, [`Container`] puts and gets, and level
//! watches; the clock jumps to the next timer whenever no process is ready.
//!
//! ```
//! use dtw_kernel::{Container, Environment};
//!
//! let env = Environment::default();
//! let tank = Container::new(&env, 10.0, 0.0).unwrap();
//!
//! let (env2, tank2) = (env.clone(), tank.clone());
//! env.spawn("filler", async move {
//!     env2.timeout(5.0).unwrap().await;
//!     tank2.put(3.0).unwrap().await;
//! });
//! env.run();
//!
//! assert_eq!(env.now(), 5.0);
//! assert_eq!(tank.level(), 3.0);
//! ```

/// Virtual clock anchored to a calendar epoch.
pub mod clock;
/// Configuration types for simulation runs.
pub mod config;
/// Bounded scalar stores with blocking put/get.
pub mod container;
/// Identifiers for entities, processes and resources.
pub mod entity;
/// The scheduler and process executor.
pub mod environment;
/// Error types for the kernel crate.
pub mod error;
/// Telemetry records, sinks and the event log.
pub mod event;
/// Process handles and wakers.
pub mod process;
/// Counting semaphores with FIFO wait queues.
pub mod resource;
/// Clock-timed waits.
pub mod timeout;

/// Re-export of [`clock::SimClock`].
pub use clock::SimClock;
/// Re-export of [`config::SimConfig`].
pub use config::SimConfig;
/// Re-exports of the container types.
pub use container::{Container, ContainerRequest, Direction, LevelChanged};
/// Re-exports of the identifier types.
pub use entity::{EntityId, ProcessId, ResourceId};
/// Re-exports of [`environment::Environment`] and [`environment::RunStats`].
pub use environment::{Environment, RunStats};
/// Re-exports of [`error::SimError`] and [`error::SimResult`].
pub use error::{SimError, SimResult};
/// Re-exports of the telemetry types.
pub use event::{EventLog, EventSink, SimEvent, SimEventKind};
/// Re-exports of [`process::ProcessHandle`] and [`process::ProcessState`].
pub use process::{ProcessHandle, ProcessState};
/// Re-exports of the resource types.
pub use resource::{Request, Resource, ResourceGuard};
/// Re-export of [`timeout::Timeout`].
pub use timeout::Timeout;
