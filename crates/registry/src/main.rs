use peer_registry::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    simple_logger::init_with_level(config.log.level.as_level())?;
    peer_registry::server_main(config).await
}
