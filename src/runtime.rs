//! Component tasks.
//!
//! Every component is a polling state machine with a `tick()`.  Each task
//! thread runs an `edge-executor` [`LocalExecutor`] whose futures call one
//! component's `tick()` and then park on an `async-io-mini` timer until the
//! next period, so an idle task costs no CPU.
//!
//! ```text
//!  ┌ net (Pro, 100 ms) ────────┐  ┌ ws (Pro, 20 ms) ─┐
//!  │  wifi.tick()  eth.tick()  │  │  session.tick()  │
//!  └───────────────────────────┘  └──────────────────┘
//!  ┌ api (App, 20 ms) ─┐          ┌ nfc (App, 40 ms) ┐
//!  │  handler.tick()   │          │  reader.tick()   │
//!  └───────────────────┘          └──────────────────┘
//! ```

use core::future::Future;
use core::time::Duration;

use edge_executor::LocalExecutor;
use log::info;

use crate::drivers::task_pin::{Core, TaskSpec, spawn_on_core};
use crate::error::Result;

pub const NETWORK_TASK: TaskSpec = TaskSpec {
    name: "net\0",
    core: Core::Pro,
    priority: 5,
    stack_kb: 8,
};

pub const WEBSOCKET_TASK: TaskSpec = TaskSpec {
    name: "ws\0",
    core: Core::Pro,
    priority: 6,
    stack_kb: 10,
};

pub const API_TASK: TaskSpec = TaskSpec {
    name: "api\0",
    core: Core::App,
    priority: 5,
    stack_kb: 12,
};

pub const NFC_TASK: TaskSpec = TaskSpec {
    name: "nfc\0",
    core: Core::App,
    priority: 4,
    stack_kb: 8,
};

/// Most loops a single task hosts.
const MAX_LOOPS: usize = 4;

/// One periodic `tick()` call.
pub struct Ticker {
    label: &'static str,
    period: Duration,
    tick: Box<dyn FnMut() + Send>,
}

impl Ticker {
    pub fn new(label: &'static str, period_ms: u32, tick: impl FnMut() + Send + 'static) -> Self {
        Self {
            label,
            period: Duration::from_millis(u64::from(period_ms.max(1))),
            tick: Box::new(tick),
        }
    }
}

async fn tick_loop(mut ticker: Ticker) {
    info!("Runtime: '{}' ticking every {:?}", ticker.label, ticker.period);
    loop {
        (ticker.tick)();
        async_io_mini::Timer::after(ticker.period).await;
    }
}

/// Drive `tickers` on the current thread until `until` completes.
pub fn run_tickers<F: Future>(tickers: Vec<Ticker>, until: F) -> F::Output {
    let executor: LocalExecutor<'_, MAX_LOOPS> = LocalExecutor::new();
    for ticker in tickers {
        executor.spawn(tick_loop(ticker)).detach();
    }
    futures_lite::future::block_on(executor.run(until))
}

/// Spawn a task thread that runs `tickers` forever.
pub fn spawn_task(spec: &TaskSpec, tickers: Vec<Ticker>) -> Result<std::thread::JoinHandle<()>> {
    let name = spec.display_name();
    spawn_on_core(spec, move || {
        run_tickers(tickers, core::future::pending::<()>());
        log::error!("Runtime: task '{}' returned", name);
    })
}
