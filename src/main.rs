use log::error;

#[tokio::main]
async fn main() {
    if let Err(err) = deye_bridge::app().await {
        error!("{:?}", err);
        eprintln!("deye-bridge: {:?}", err);
        std::process::exit(255);
    }
}
