//! C5: one authenticated conversation with one AMI server.

use crate::action_id::ActionIdGenerator;
use crate::bus::SubscriptionBus;
use crate::config::{AuthMode, ProviderConfig};
use crate::correlator::Correlator;
use crate::error::AmiError;
use crate::record::{self, Record, ResponseStatus};
use crate::wire::{FrameEvent, Framer};
use crate::Outcome;
use ami_protocol::{actions, Action, ActionCatalog};
use md5::{Digest, Md5};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, info, warn};

/// The bound on [`SessionHandle::submit`]'s queue to the run loop.
/// Overflow rejects with [`Outcome::Busy`] rather than blocking the
/// caller (`spec.md` §5).
const SUBMIT_QUEUE_CAPACITY: usize = 64;

/// A transport that's either a plain `TcpStream` or a TLS stream over
/// one, unified behind one boxed trait object so the framer and write
/// half don't need to be generic over which it is.
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

/// Lazily builds the shared TLS client config: the `webpki-roots` bundle
/// via `rustls`'s `ring` provider, no client certificate. Built once per
/// process and reused by every TLS-enabled provider.
fn tls_connector() -> TlsConnector {
    static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();
    CONNECTOR
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let config = rustls::ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .expect("ring provider supports the default TLS protocol versions")
                .with_root_certificates(roots)
                .with_no_client_auth();
            TlsConnector::from(Arc::new(config))
        })
        .clone()
}

async fn dial(config: &ProviderConfig) -> Result<BoxedTransport, AmiError> {
    let address = format!("{}:{}", config.address, config.port);
    let tcp = TcpStream::connect(&address).await?;
    if !config.use_tls {
        return Ok(Box::new(tcp));
    }
    let server_name = rustls_pki_types::ServerName::try_from(config.address.clone())
        .map_err(|e| AmiError::Tls(format!("invalid TLS server name '{}': {e}", config.address)))?;
    let tls_stream = tls_connector().connect(server_name, tcp).await?;
    Ok(Box::new(tls_stream))
}

/// The session's lifecycle, following `spec.md` §3 exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Dialling,
    GreetingAwaited,
    Challenging,
    Authenticating,
    Online,
    Draining,
    Closed,
    Failed(String),
}

/// A request to submit an action, sent from [`SessionHandle::submit`]
/// into the session's run loop.
struct SubmitRequest {
    action: Action,
    deadline: Duration,
    resolve: oneshot::Sender<Outcome>,
}

/// A live handle to a running session. Cheap to clone; every clone
/// shares the same underlying run loop.
#[derive(Clone)]
pub struct SessionHandle {
    submit_tx: mpsc::Sender<SubmitRequest>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Submits an action and awaits its [`Outcome`]. Stamps the
    /// action's `ActionID` before handing it to the run loop; the
    /// caller never has to assign one itself.
    ///
    /// Never blocks on a full queue: a saturated submit channel
    /// resolves immediately with [`Outcome::Busy`] (`spec.md` §5).
    pub async fn submit(&self, action: Action, deadline: Duration) -> Outcome {
        let (resolve, rx) = oneshot::channel();
        let req = SubmitRequest {
            action,
            deadline,
            resolve,
        };
        match self.submit_tx.try_send(req) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let err = AmiError::Busy(SUBMIT_QUEUE_CAPACITY);
                warn!(%err, "submit queue saturated, rejecting");
                return Outcome::Busy;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Outcome::Disconnected("session run loop has stopped".to_owned());
            }
        }
        rx.await
            .unwrap_or_else(|_| Outcome::Disconnected("session run loop dropped the request".to_owned()))
    }
}

/// Connects to `config`'s endpoint, performs the login handshake, and —
/// on success — spawns the session's run loop, returning a
/// [`SessionHandle`] immediately. On handshake failure, returns the
/// error without spawning anything; the caller (the supervisor's
/// reconnect loop, `spec.md` §4.8) decides whether to retry.
pub async fn connect(
    config: &ProviderConfig,
    catalog: Arc<dyn ActionCatalog>,
    bus: SubscriptionBus,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SessionHandle, AmiError> {
    let stream = dial(config).await?;
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut framer = Framer::new(BufReader::new(read_half));

    let greeting = match framer.next_event().await? {
        FrameEvent::Greeting(line) => line,
        FrameEvent::Packet(_) => {
            return Err(AmiError::UnexpectedGreeting(
                "server sent a packet before the banner line".to_owned(),
            ));
        }
    };
    if !greeting.to_ascii_lowercase().contains("asterisk call manager") {
        return Err(AmiError::UnexpectedGreeting(greeting));
    }
    debug!(%greeting, provider = %config.title, "received AMI greeting");

    let id_gen = ActionIdGenerator::new();
    let correlator = Arc::new(Correlator::new());

    login(config, &id_gen, &correlator, &catalog, &mut framer, &mut write_half).await?;

    let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_QUEUE_CAPACITY);
    let (state_tx, state_rx) = watch::channel(SessionState::Online);

    tokio::spawn(run_loop(RunLoopArgs {
        config: config.clone(),
        framer,
        write_half,
        id_gen,
        correlator,
        catalog,
        bus,
        submit_rx,
        state_tx,
        shutdown,
    }));

    Ok(SessionHandle {
        submit_tx,
        state: state_rx,
    })
}

/// Runs the login handshake — plaintext `Login` or `Challenge`/MD5
/// `Login`, per `config.auth_mode` (`spec.md` §4.5 step 3).
async fn login<R>(
    config: &ProviderConfig,
    id_gen: &ActionIdGenerator,
    correlator: &Correlator,
    catalog: &Arc<dyn ActionCatalog>,
    framer: &mut Framer<R>,
    write_half: &mut WriteHalf<BoxedTransport>,
) -> Result<(), AmiError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match config.auth_mode {
        AuthMode::Plaintext => login_plaintext(config, id_gen, correlator, catalog, framer, write_half).await,
        AuthMode::Challenge => login_challenge(config, id_gen, correlator, catalog, framer, write_half).await,
    }
}

async fn login_plaintext<R>(
    config: &ProviderConfig,
    id_gen: &ActionIdGenerator,
    correlator: &Correlator,
    catalog: &Arc<dyn ActionCatalog>,
    framer: &mut Framer<R>,
    write_half: &mut WriteHalf<BoxedTransport>,
) -> Result<(), AmiError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let login_action = actions::login_plaintext(&config.username, &config.secret, &config.event_mask)
        .with_action_id(id_gen.next());
    let login_id = login_action.action_id.clone();
    let rx = correlator.register(login_id.clone(), "Login", catalog.as_ref());
    write_half.write_all(&login_action.encode()).await?;

    let outcome = read_until_resolved(framer, correlator, rx, Duration::from_secs(10)).await?;
    match outcome {
        Outcome::Response(resp) if resp.status == ResponseStatus::Success => {
            info!(provider = %config.title, "AMI login accepted (plaintext)");
            Ok(())
        }
        Outcome::Response(resp) => Err(AmiError::AuthenticationFailed(
            resp.message.unwrap_or_else(|| "login rejected".to_owned()),
        )),
        _ => Err(AmiError::LoginTimedOut(Duration::from_secs(10))),
    }
}

async fn login_challenge<R>(
    config: &ProviderConfig,
    id_gen: &ActionIdGenerator,
    correlator: &Correlator,
    catalog: &Arc<dyn ActionCatalog>,
    framer: &mut Framer<R>,
    write_half: &mut WriteHalf<BoxedTransport>,
) -> Result<(), AmiError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let challenge_action = actions::challenge("MD5").with_action_id(id_gen.next());
    let challenge_id = challenge_action.action_id.clone();
    let rx = correlator.register(challenge_id.clone(), "Challenge", catalog.as_ref());
    write_half.write_all(&challenge_action.encode()).await?;

    let outcome = read_until_resolved(framer, correlator, rx, Duration::from_secs(10)).await?;
    let challenge_value = match outcome {
        Outcome::Response(resp) if resp.status == ResponseStatus::Success => resp
            .extras
            .get("challenge")
            .cloned()
            .ok_or_else(|| AmiError::MalformedPacket("Challenge response missing Challenge field".to_owned()))?,
        Outcome::Response(resp) => {
            return Err(AmiError::AuthenticationFailed(
                resp.message.unwrap_or_else(|| "challenge request rejected".to_owned()),
            ));
        }
        _ => return Err(AmiError::LoginTimedOut(Duration::from_secs(10))),
    };

    let mut hasher = Md5::new();
    hasher.update(challenge_value.as_bytes());
    hasher.update(config.secret.as_bytes());
    let key_hex = hex::encode(hasher.finalize());

    let login_action = actions::login_md5(&config.username, &key_hex, &config.event_mask)
        .with_action_id(id_gen.next());
    let login_id = login_action.action_id.clone();
    let rx = correlator.register(login_id.clone(), "Login", catalog.as_ref());
    write_half.write_all(&login_action.encode()).await?;

    let outcome = read_until_resolved(framer, correlator, rx, Duration::from_secs(10)).await?;
    match outcome {
        Outcome::Response(resp) if resp.status == ResponseStatus::Success => {
            info!(provider = %config.title, "AMI login accepted");
            Ok(())
        }
        Outcome::Response(resp) => Err(AmiError::AuthenticationFailed(
            resp.message.unwrap_or_else(|| "login rejected".to_owned()),
        )),
        _ => Err(AmiError::LoginTimedOut(Duration::from_secs(10))),
    }
}

/// Drives the framer just long enough to resolve one registered
/// action, used only during the handshake before the run loop exists
/// to do this job generically. Any event or unrelated response read
/// along the way is decoded and fed to the correlator (a no-op, since
/// nothing else is registered yet) and otherwise discarded — the
/// handshake doesn't need the subscription bus.
async fn read_until_resolved<R>(
    framer: &mut Framer<R>,
    correlator: &Correlator,
    rx: oneshot::Receiver<Outcome>,
    deadline: Duration,
) -> Result<Outcome, AmiError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    tokio::pin!(rx);
    loop {
        tokio::select! {
            outcome = &mut rx => {
                return Ok(outcome.unwrap_or(Outcome::Disconnected("correlator dropped the handshake request".to_owned())));
            }
            frame = tokio::time::timeout(deadline, framer.next_event()) => {
                match frame {
                    Err(_) => return Ok(Outcome::TimedOut),
                    Ok(Err(e)) => return Err(e),
                    Ok(Ok(FrameEvent::Greeting(_))) => continue,
                    Ok(Ok(FrameEvent::Packet(packet))) => {
                        match record::decode(&packet) {
                            Record::ActionResponse(resp) => correlator.handle_response(resp),
                            Record::Event(ev) => correlator.handle_event(ev),
                            Record::Unknown { .. } => {}
                        }
                    }
                }
            }
        }
    }
}

struct RunLoopArgs {
    config: ProviderConfig,
    framer: Framer<BufReader<ReadHalf<BoxedTransport>>>,
    write_half: WriteHalf<BoxedTransport>,
    id_gen: ActionIdGenerator,
    correlator: Arc<Correlator>,
    catalog: Arc<dyn ActionCatalog>,
    bus: SubscriptionBus,
    submit_rx: mpsc::Receiver<SubmitRequest>,
    state_tx: watch::Sender<SessionState>,
    shutdown: watch::Receiver<bool>,
}

/// The session's steady-state loop: reads frames, feeds the
/// correlator and subscription bus, serves submit requests, and — when
/// `config.keep_alive_interval` is set — sends keep-alive pings. Ends
/// when the peer disconnects, the transport errors, the peer goes
/// silent for `2 * keep_alive_interval` (only enforced when keep-alive
/// is configured), or shutdown fires (`spec.md` §4.5, §9 Open
/// Questions — silent-peer bound).
async fn run_loop(args: RunLoopArgs) {
    let RunLoopArgs {
        config,
        mut framer,
        mut write_half,
        id_gen,
        correlator,
        catalog,
        bus,
        mut submit_rx,
        state_tx,
        mut shutdown,
    } = args;

    // `None` means keep-alive is off: no ping ticker, no silent-peer
    // timeout (`spec.md` §4.5 "when configured").
    let silent_peer_bound = config.keep_alive_interval.map(|interval| interval * 2);
    let mut keep_alive_ticker = config.keep_alive_interval.map(|interval| {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    });
    let mut last_activity = tokio::time::Instant::now();

    let close = loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break CloseOutcome::Graceful;
                }
            }

            frame = framer.next_event() => {
                last_activity = tokio::time::Instant::now();
                match frame {
                    Err(e) => break CloseOutcome::Failed(format!("transport error: {e}")),
                    Ok(FrameEvent::Greeting(_)) => {
                        warn!(provider = %config.title, "unexpected second greeting line, ignoring");
                    }
                    Ok(FrameEvent::Packet(packet)) => {
                        match record::decode(&packet) {
                            Record::ActionResponse(mut resp) => {
                                if resp.status == ResponseStatus::Follows {
                                    match framer.read_follows_body().await {
                                        Ok(body) => resp.output = Some(body),
                                        Err(e) => break CloseOutcome::Failed(format!(
                                            "transport error reading Follows body: {e}"
                                        )),
                                    }
                                }
                                correlator.handle_response(resp);
                            }
                            Record::Event(event) => {
                                correlator.handle_event(event.clone());
                                bus.publish(event);
                            }
                            Record::Unknown { discriminator, .. } => {
                                debug!(provider = %config.title, ?discriminator, "unrecognized packet, ignoring");
                            }
                        }
                    }
                }
            }

            req = submit_rx.recv() => {
                let Some(req) = req else {
                    break CloseOutcome::Failed("submit channel closed".to_owned());
                };
                let mut action = req.action;
                action.action_id = id_gen.next();
                let rx = correlator.register(action.action_id.clone(), &action.name, catalog.as_ref());
                if let Err(e) = write_half.write_all(&action.encode()).await {
                    let _ = req.resolve.send(Outcome::Disconnected(format!("write failed: {e}")));
                    break CloseOutcome::Failed(format!("transport error on write: {e}"));
                }
                let correlator = correlator.clone();
                let action_id = action.action_id;
                let deadline = req.deadline;
                let resolve = req.resolve;
                tokio::spawn(async move {
                    let outcome = correlator.wait(action_id, deadline, rx).await;
                    let _ = resolve.send(outcome);
                });
            }

            _ = async {
                match keep_alive_ticker.as_mut() {
                    Some(ticker) => { ticker.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                let silent_peer_bound = silent_peer_bound.expect("ticker only fires when keep-alive is configured");
                if last_activity.elapsed() >= silent_peer_bound {
                    break CloseOutcome::Failed(format!(
                        "no traffic from peer for {silent_peer_bound:?}, treating as stalled"
                    ));
                }
                let ping = actions::ping().with_action_id(id_gen.next());
                let rx = correlator.register(ping.action_id.clone(), "Ping", catalog.as_ref());
                if let Err(e) = write_half.write_all(&ping.encode()).await {
                    break CloseOutcome::Failed(format!("transport error sending keep-alive: {e}"));
                }
                let correlator = correlator.clone();
                let action_id = ping.action_id;
                tokio::spawn(async move {
                    let _ = correlator.wait(action_id, Duration::from_secs(5), rx).await;
                });
            }
        }
    };

    match close {
        CloseOutcome::Graceful => {
            let _ = state_tx.send(SessionState::Draining);
            let logoff = actions::logoff().with_action_id(id_gen.next());
            // best-effort: a write failure here doesn't change the outcome,
            // the transport is going away regardless (`spec.md` §4.5 Teardown).
            let _ = write_half.write_all(&logoff.encode()).await;
            info!(provider = %config.title, "session closed gracefully");
            correlator.fail_all("session closed");
            let _ = state_tx.send(SessionState::Closed);
        }
        CloseOutcome::Failed(reason) => {
            warn!(provider = %config.title, %reason, "session failed");
            correlator.fail_all(&reason);
            let _ = state_tx.send(SessionState::Failed(reason));
        }
    }
}

/// Why the steady-state loop ended — distinguishes a requested shutdown
/// (which still attempts a best-effort `Logoff`) from every other path,
/// which lands the session in `Failed(reason)` instead of `Closed`
/// (`spec.md` §3's `Failed` failure sink).
enum CloseOutcome {
    Graceful,
    Failed(String),
}
