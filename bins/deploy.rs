use dotenvy::dotenv;
use tracing::{error, info};
use uuid::Uuid;

fn init_logging() {
    // 提前加载 .env，使得 RUST_LOG / DEPLOY_* 等环境变量生效
    dotenv().ok();
    // compact by default, JSON with DEPLOY_LOG_FORMAT=json
    common::utils::logging::init_logging_from_env();
}

fn main() -> std::process::ExitCode {
    init_logging();

    let service_id = Uuid::new_v4();
    let pid = std::process::id();
    let version = env!("CARGO_PKG_VERSION");

    // Panic 钩子：捕获异常并输出错误日志
    std::panic::set_hook(Box::new({
        let service_id = service_id;
        move |info| {
            error!(
                service = "deploy",
                event = "panic",
                %service_id,
                pid,
                message = %info,
                "unhandled panic occurred"
            );
        }
    }));

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "deploy", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return std::process::ExitCode::FAILURE;
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    info!(service = "deploy", event = "start", %service_id, pid, version, command = %args.join(" "), "deploy starting");

    let code = match rt.block_on(cli::run(&args)) {
        Ok(code) => code,
        Err(e) => {
            error!(service = "deploy", event = "failed", %service_id, error = %format!("{e:#}"), "command failed");
            1
        }
    };

    info!(service = "deploy", event = "stop", %service_id, pid, code, "deploy finished");
    std::process::ExitCode::from(u8::try_from(code).unwrap_or(1))
}
