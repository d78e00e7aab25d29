//
//  Sample server.
//
//  Listens on port 4918, plain http, no tls.
//  Serves a local directory, or an in-memory tree with --memfs.
//
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;

use clap::Parser;

use davkit::fs::localfs::LocalFs;
use davkit::fs::memfs::MemFs;
use davkit::locks::LockManager;
use davkit::DavHandler;

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve
    #[arg(short, long)]
    dir: Option<String>,
    /// serve an ephemeral in-memory filesystem instead
    #[arg(short, long)]
    memfs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let builder = DavHandler::builder()
        .locksystem(LockManager::new())
        .logger(|status, err| log::warn!("request failed: {status}: {err}"));
    let (dav, name) = match (&cli.dir, cli.memfs) {
        (Some(dir), false) => (
            builder.filesystem(LocalFs::new(dir, true)).build(),
            dir.as_str(),
        ),
        _ => (builder.filesystem(MemFs::new()).build(), "memory filesystem"),
    };

    let make_service = hyper::service::make_service_fn(move |_| {
        let dav = dav.clone();
        async move {
            let service = hyper::service::service_fn(move |req| {
                let dav = dav.clone();
                async move { Ok::<_, Infallible>(dav.handle(req).await) }
            });
            Ok::<_, Infallible>(service)
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    println!("Serving {name} on {addr}");
    hyper::Server::try_bind(&addr)?.serve(make_service).await?;
    Ok(())
}
