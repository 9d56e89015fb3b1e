//! A full gas chain behind a plain hyper accept loop.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i --compressed http://localhost:3000/hello
//!   curl -i -u admin:s3cret http://localhost:3000/admin
//!   curl -i http://localhost:3000/panic

use std::net::SocketAddr;

use gases::middleware::{BasicAuth, Gzip, Logger, Recover, Secure, Static, StaticConfig};
use gases::{Chain, Endpoint, Error, Request, Response, wrap};
use http::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let app = Chain::new()
        .gas(Logger::default())
        .gas(Recover::default())
        .gas(Secure::default())
        .gas(Gzip::default())
        .gas(Static::with_config(StaticConfig { root: "demos/public".into(), html5: true, ..Default::default() }))
        .handler(routes());

    let addr: SocketAddr = ([127, 0, 0, 1], 3000).into();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let mut tasks = tokio::task::JoinSet::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutting down, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };
                let svc = gases::service::service(app.clone(), peer);
                tasks.spawn(async move {
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        error!(%peer, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}
    Ok(())
}

// Routing is the embedder's job; a match on the path is enough here.
fn routes() -> Endpoint {
    let admin = wrap(
        BasicAuth::new(|user, pass| user == "admin" && pass == "s3cret"),
        |_req: Request| async { Ok::<_, Error>(Response::text("welcome, admin")) },
    );

    let router = move |req: Request| {
        let admin = admin.clone();
        async move {
            match req.path() {
                "/hello" => Ok(Response::text("hello ".repeat(200))),
                "/panic" => panic!("handler blew up"),
                "/admin" => admin.call(req).await,
                _ => Err(StatusCode::NOT_FOUND.into()),
            }
        }
    };
    gases::Handler::into_endpoint(router)
}
