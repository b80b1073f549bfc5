use market_sync::{ClientConfig, Marketplace};
use optimist::{GatewayError, Refresh};

fn report(name: &str, result: Result<Refresh, GatewayError>) {
    match result {
        Ok(Refresh::Applied { items, aggregate }) => {
            log::info!("{name}: {items} items, aggregate {aggregate}")
        }
        Ok(other) => log::warn!("{name}: refresh not applied ({other:?})"),
        Err(e) => log::error!("{name}: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    market_sync::init_logging();
    let config = ClientConfig::from_env()?;
    log::info!("Using {}", config.api_url);
    let market = Marketplace::new(config)?;

    if !market.is_signed_in() {
        anyhow::bail!("MARKET_API_TOKEN is not set; nothing to watch while signed out");
    }

    let (wishlist, notifications, chats) = market.refresh_all().await;
    report("wishlist", wishlist);
    report("notifications", notifications);
    report("chats", chats);

    println!("saved products:       {}", market.wishlist.aggregate());
    println!("unread notifications: {}", market.notifications.aggregate());
    println!("unread chat messages: {}", market.chats.aggregate());
    println!("badge:                {}", market.unread_total());

    Ok(())
}
