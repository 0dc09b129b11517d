use clap::Parser;
use rtsp_relay::{Relay, RelayConfig};
use std::io;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "rtsp-relay",
    about = "RTSP relay: publishers ANNOUNCE in, subscribers PLAY out"
)]
struct Args {
    /// Publisher listen address (host:port)
    #[arg(long, default_value = "0.0.0.0:5554")]
    publish_bind: String,

    /// Subscriber listen address (host:port)
    #[arg(long, default_value = "0.0.0.0:6554")]
    client_bind: String,

    /// First UDP port of the RTP pool (rounded up to even)
    #[arg(long, default_value_t = 10000)]
    rtp_port_start: u16,

    /// Number of UDP ports in the RTP pool
    #[arg(long, default_value_t = 10000)]
    rtp_port_count: u16,

    /// Seconds a silent subscriber session survives
    #[arg(long, default_value_t = 60)]
    keepalive_secs: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = RelayConfig {
        publish_addr: args.publish_bind.clone(),
        client_addr: args.client_bind.clone(),
        rtp_port_start: args.rtp_port_start,
        rtp_port_count: args.rtp_port_count,
        keepalive: Duration::from_secs(args.keepalive_secs),
        ..Default::default()
    };

    let mut relay = Relay::new(config);

    if let Err(e) = relay.start() {
        eprintln!("Failed to start relay: {}", e);
        return;
    }

    println!(
        "RTSP relay: publish on {}, subscribe on {} — press Enter to stop",
        args.publish_bind, args.client_bind
    );
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    if let Err(e) = relay.stop() {
        eprintln!("Failed to stop relay: {}", e);
    }
}
