use clap::Parser;

use camera_agent::cli_app::{agent_start, run_agent, AgentArgs};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    agent_start();
    let args = AgentArgs::parse();
    run_agent(args).await
}
