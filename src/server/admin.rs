//! 管理接口
//!
//! 独立监听地址上的 `Register` / `Unregister` / `Stop` 命令，直接转调服务句柄。

use super::service::{Service, stopping};
use crate::protocol::{AdminRequest, AdminResponse, MessageStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub(crate) async fn admin_loop(
    listener: TcpListener,
    service: Service,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Admin connection accepted");
                    tokio::spawn(serve_admin(stream, service.clone()));
                }
                Err(e) => warn!(error = %e, "Admin accept error"),
            },
            _ = stopping(&mut shutdown) => return,
        }
    }
}

async fn serve_admin(stream: TcpStream, service: Service) {
    let mut stream = MessageStream::new(stream);

    while let Ok(request) = stream.read_message::<AdminRequest>().await {
        info!(command = ?request, "Admin command received");

        let result = match request {
            AdminRequest::Register => service.register().await,
            AdminRequest::Unregister => service.unregister().await,
            AdminRequest::Stop { wait_for_clients: true } => {
                service.shutdown().await;
                Ok(())
            }
            AdminRequest::Stop { wait_for_clients: false } => {
                let service = service.clone();
                tokio::spawn(async move { service.shutdown().await });
                Ok(())
            }
        };

        let response = AdminResponse {
            error: result.err().map(|e| e.to_string()).unwrap_or_default(),
        };
        if stream.write_message(&response).await.is_err() {
            return;
        }
    }
}
