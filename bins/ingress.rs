use common::utils::logging::init_logging_json;
use dotenvy::dotenv;
use ingress::bootstrap;
use tracing::{error, info};
use uuid::Uuid;

fn main() {
    // 加载 .env（允许使用 RUST_LOG / INGRESS_CONFIG）
    dotenv().ok();
    init_logging_json();
    info!(service = "ingress", event = "logger_init", "logger initialized");

    let service_id = Uuid::new_v4();
    let pid = std::process::id();
    let version = env!("CARGO_PKG_VERSION");

    // Panic 钩子：捕获异常并输出错误日志
    std::panic::set_hook(Box::new({
        let service_id = service_id;
        move |info| {
            error!(
                service = "ingress",
                event = "panic",
                %service_id,
                pid,
                message = %info,
                "unhandled panic occurred"
            );
        }
    }));

    info!(service = "ingress", event = "start", %service_id, pid, version, "ingress service starting");

    // run_forever only returns by exiting the process
    bootstrap::run();
}
