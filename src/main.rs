//! Platform Engine Controller binary.

use anyhow::Result;
use platform_engine_controller::runtime::initialization::initialize;
use platform_engine_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;

    run_watch_loop(
        init_result.client,
        init_result.engines,
        init_result.reconciler,
        init_result.server_state,
    )
    .await
}
