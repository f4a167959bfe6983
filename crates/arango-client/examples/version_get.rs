//! Fetch a path from an ArangoDB server and print the response.
//!
//! ```text
//! cargo run --example version_get -- \
//!     --host http://127.0.0.1:8529 --path /_api/version --method GET
//! ```

use std::time::Duration;

use arango_client::{ConnectionBuilder, Reactor, Request, to_rest_verb};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut host = "http://127.0.0.1:8529".to_string();
    let mut path = "/_api/version".to_string();
    let mut method = "GET".to_string();
    let mut user = String::new();
    let mut password = String::new();

    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("missing value for {name}"))
        };
        match flag.as_str() {
            "--host" | "-H" => host = value("--host")?,
            "--path" | "-p" => path = value("--path")?,
            "--method" | "-X" => method = value("--method")?,
            "--user" => user = value("--user")?,
            "--password" => password = value("--password")?,
            "--help" => {
                eprintln!(
                    "usage: version_get [--host URL] [--path PATH] [--method VERB] \
                     [--user USER] [--password PW]"
                );
                return Ok(());
            }
            other => return Err(format!("unknown flag {other}").into()),
        }
    }

    let reactor = Reactor::new()?;
    let mut builder = ConnectionBuilder::new()
        .endpoint(&host)?
        .connect_timeout(Duration::from_secs(5))
        .on_failure(|condition, message| {
            eprintln!("connection failure ({condition}): {message}");
        });
    if !user.is_empty() {
        builder = builder.basic_auth(user, password);
    }
    let connection = builder.connect(&reactor)?;

    let request = Request::new(to_rest_verb(&method)?, path);
    let response = connection.send_request(request)?;

    println!("status: {}", response.header.status_code);
    for (name, value) in &response.header.meta {
        println!("{name}: {value}");
    }
    println!();
    println!("{}", String::from_utf8_lossy(&response.payload));
    Ok(())
}
