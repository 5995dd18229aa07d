mod logging;

use std::{env, process, sync::Arc, time::Duration};

use courier_core::{SendRequest, TransportConfig, TransportEvent};
use courier_http::Transport;
#[cfg(not(feature = "os-keyring"))]
use courier_platform::InMemorySecretStore;
#[cfg(feature = "os-keyring")]
use courier_platform::OsKeyringSecretStore;
use courier_platform::{BearerCredentials, HostSignals, SecretStore};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

const KEYRING_SERVICE: &str = "dev.courier.smoke";
const KEYRING_ACCOUNT: &str = "bearer";
const DEFAULT_SESSION: &str = "courier-smoke";
const DEFAULT_RUN_SECS: u64 = 15;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match TransportConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(2);
        }
    };
    if config.base_url.is_none() {
        println!("Set COURIER_BASE_URL to run the live smoke.");
        println!("Optional: COURIER_TOKEN, COURIER_SESSION, COURIER_MESSAGE, COURIER_SMOKE_SECS");
        return;
    }

    #[cfg(feature = "os-keyring")]
    let credentials = bearer_credentials(OsKeyringSecretStore);
    #[cfg(not(feature = "os-keyring"))]
    let credentials = bearer_credentials(InMemorySecretStore::default());

    let transport = match Transport::http(config, credentials, Arc::new(HostSignals::default())) {
        Ok(transport) => transport,
        Err(err) => {
            eprintln!("Failed to initialize transport: {err}");
            process::exit(1);
        }
    };

    let mut events = transport.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => println!("[events] skipped {skipped}"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let session_id = env::var("COURIER_SESSION").unwrap_or_else(|_| DEFAULT_SESSION.to_owned());
    transport.start(&session_id).await;

    if let Some(body) = env::var("COURIER_MESSAGE")
        .ok()
        .filter(|body| !body.trim().is_empty())
    {
        let id = transport.send_message(SendRequest::new(session_id.clone(), body));
        info!(message_id = %id, "smoke message submitted");
    }

    let run_for = env::var("COURIER_SMOKE_SECS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RUN_SECS);
    tokio::time::sleep(Duration::from_secs(run_for)).await;

    let status = transport.status();
    println!(
        "final status: {:?} \"{}\" healthy={} errors={} queued={}",
        status.state,
        status.message,
        status.healthy,
        status.consecutive_errors,
        transport.queued_count()
    );

    transport.shutdown().await;
    printer.abort();
}

fn bearer_credentials<S>(store: S) -> Arc<BearerCredentials<S>>
where
    S: SecretStore + 'static,
{
    let credentials = BearerCredentials::new(store, KEYRING_SERVICE, KEYRING_ACCOUNT);
    if let Some(token) = env::var("COURIER_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
        && let Err(err) = credentials.store(token.trim())
    {
        error!(error = %err, "failed storing bearer token");
    }
    Arc::new(credentials)
}

fn print_event(event: &TransportEvent) {
    match event {
        TransportEvent::StatusChanged(status) => {
            println!("[status] {:?}: {}", status.state, status.message);
        }
        TransportEvent::MessageUpdated(message) => {
            println!("[message] {} {:?}", message.id, message.status);
        }
        TransportEvent::MessageRemoved { id, .. } => {
            println!("[message] {id} removed");
        }
        TransportEvent::MessagesReceived { messages, .. } => {
            for message in messages {
                println!("[{:?}] {}", message.role, message.body);
            }
        }
        TransportEvent::PollStatus(status) => {
            if let Some(delay) = status.next_poll_ms {
                println!("[poll] next in {delay}ms");
            }
        }
        TransportEvent::AuthRequired => println!("[auth] credential rejected"),
    }
}
