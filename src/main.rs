use anyhow::Result;
use mcp_workspace::server;

#[tokio::main]
async fn main() -> Result<()> {
	let options = server::load_options()?;
	server::install_panic_hook();
	server::run(options).await
}
