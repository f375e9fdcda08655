// src/api/handlers/ws.rs
use actix::{Actor, StreamHandler, Handler, Message, Addr, AsyncContext};
use actix_web::{web, HttpRequest, HttpResponse, Error};
use actix_web_actors::ws;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Status of a finished run or check, pushed to every connected editor.
#[derive(Message, Clone, Serialize, Debug)]
#[rtype(result = "()")]
pub struct RunUpdate {
    pub id: String,
    pub student: String,
    pub task_id: i64,
    pub kind: String,
    pub status: String,
    pub passed_count: Option<usize>,
    pub total_count: Option<usize>,
}

#[derive(Clone, Default)]
pub struct WsBroker {
    clients: Arc<RwLock<Vec<Addr<WsConnection>>>>,
}

impl WsBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, addr: Addr<WsConnection>) {
        let mut clients = self.clients.write().await;
        clients.push(addr);
    }

    pub async fn unregister(&self, addr: &Addr<WsConnection>) {
        let mut clients = self.clients.write().await;
        clients.retain(|c| c != addr);
    }

    pub async fn broadcast(&self, msg: RunUpdate) {
        let clients = self.clients.read().await;
        log::debug!("Broadcasting {} '{}' to {} client(s)", msg.kind, msg.status, clients.len());
        for client in clients.iter() {
            client.do_send(msg.clone());
        }
    }
}

pub struct WsConnection {
    broker: WsBroker,
}

impl WsConnection {
    pub fn new(broker: WsBroker) -> Self {
        Self { broker }
    }
}

impl Actor for WsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let broker = self.broker.clone();
        actix::spawn(async move {
            broker.register(addr).await;
        });
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let broker = self.broker.clone();
        actix::spawn(async move {
            broker.unregister(&addr).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Close(reason)) => ctx.close(reason),
            _ => (),
        }
    }
}

impl Handler<RunUpdate> for WsConnection {
    type Result = ();

    fn handle(&mut self, msg: RunUpdate, ctx: &mut Self::Context) {
        if let Ok(json) = serde_json::to_string(&msg) {
            ctx.text(json);
        }
    }
}

pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    broker: web::Data<WsBroker>,
) -> Result<HttpResponse, Error> {
    let conn = WsConnection::new(broker.get_ref().clone());
    ws::start(conn, &req, stream)
}
