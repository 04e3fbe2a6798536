use std::net::SocketAddr;

use peer_node::config::Config;
use peer_node::runtime::PeerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, connect_to) = Config::load();
    simple_logger::init_with_level(config.log.level.as_level())?;

    let runtime = PeerRuntime::new(&config);
    runtime.join_network().await?;
    log::info!("joined, status = {:?}", runtime.status());

    if let Some(target) = connect_to {
        let target: SocketAddr = target.parse()?;
        log::info!("attempting rendezvous with {target}");
        match runtime.connect_to(target).await {
            Ok(()) => log::info!("rendezvous with {target} complete"),
            Err(e) => log::error!("rendezvous with {target} failed: {e}"),
        }
    }

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    runtime.leave_network().await?;
    Ok(())
}
