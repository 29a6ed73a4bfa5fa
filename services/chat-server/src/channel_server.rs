use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rt_chat_protocol::ChannelKind;
use tracing::{info, warn};

use crate::conn_ctx::ConnCtx;
use crate::demux::{self, ProtocolErrorBudget};
use crate::registry::HEARTBEAT_INTERVAL;
use crate::state::AppState;
use crate::ws_conn::{encode, frame_too_large, parse_incoming, ConnectionWriter};

#[derive(Clone)]
struct ChannelState {
    state: AppState,
    channel: ChannelKind,
}

fn router(state: AppState, channel: ChannelKind) -> Router {
    Router::new().route("/ws", get(ws_upgrade_handler)).with_state(ChannelState { state, channel })
}

async fn ws_upgrade_handler(ws: WebSocketUpgrade, State(cs): State<ChannelState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(socket, cs.state, cs.channel))
}

fn channel_by_name(name: &str) -> ChannelKind {
    match name {
        "msg" => ChannelKind::Msg,
        "cmd" => ChannelKind::Cmd,
        "data" => ChannelKind::Data,
        other => panic!("unknown channel name: {other}"),
    }
}

/// Binds and serves one of the three long-lived channels. Each channel gets
/// its own listener and its own single-task connection loop -- a client
/// maintains three separate sockets, one per `ChannelKind`.
pub async fn run_channel(name: &str, port: u16, state: AppState) {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {name} channel on {addr}: {e}"));
    info!(channel = name, %addr, "listening");
    serve(listener, name, state).await;
}

/// Serves one channel on an already-bound listener. Split out of
/// `run_channel` so a test harness can bind an ephemeral port itself (via
/// `TcpListener::bind("127.0.0.1:0")`) and learn the real port before the
/// server starts accepting.
pub async fn serve(listener: tokio::net::TcpListener, name: &str, state: AppState) {
    let app = router(state, channel_by_name(name));
    axum::serve(listener, app).await.expect("channel server error");
}

/// One task owns the whole connection end to end: the inbound read loop,
/// the outbound mpsc drain, and the idle-ping tick, all in one
/// `tokio::select!` rather than splitting sink/stream across tasks.
async fn run_connection(mut socket: WebSocket, state: AppState, channel: ChannelKind) {
    let (writer, mut outbox, _last_active) = ConnectionWriter::new();
    let mut ctx = ConnCtx { state, channel, user_id: None, writer: writer.clone() };
    let mut budget = ProtocolErrorBudget::default();
    let mut idle_ping = tokio::time::interval(HEARTBEAT_INTERVAL);
    idle_ping.tick().await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if frame_too_large(&msg) {
                            warn!(channel = channel.as_str(), "oversized frame, closing connection");
                            break;
                        }
                        writer.touch();
                        if matches!(msg, Message::Close(_)) {
                            break;
                        }
                        if let Some(result) = parse_incoming(&msg) {
                            match result {
                                Ok(env) => {
                                    if let Err(err) = demux::dispatch(&mut ctx, env.payload).await {
                                        warn!(channel = channel.as_str(), error = %err, "protocol error");
                                        ctx.reply(err.to_refusal()).await;
                                        if budget.record() {
                                            break;
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!(channel = channel.as_str(), error = %e, "malformed frame");
                                    if budget.record() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(channel = channel.as_str(), error = %e, "socket error");
                        break;
                    }
                    None => break,
                }
            }
            _ = idle_ping.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            outgoing = outbox.recv() => {
                match outgoing {
                    Some(env) => match encode(&env) {
                        Ok(msg) => {
                            if socket.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode outbound envelope"),
                    },
                    None => break,
                }
            }
        }
    }

    if let Some(user_id) = ctx.user_id.clone() {
        if ctx.state.registry.unbind_channel(&user_id, channel).await {
            ctx.state.mark_offline_and_broadcast(&user_id).await;
        }
    }
}
