//! mcp-chat 终端对话
//!
//! 入口：初始化日志、加载配置、创建 Agent，然后逐行读取 stdin 作为用户输入。
//! 命令：/reset 清空会话，/tools 列出工具，/refresh 重新拉取工具，/quit 退出。

use std::io::Write;

use anyhow::Context;
use mcp_chat::{config::load_config, observability, Agent};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let agent = Agent::from_config(&cfg).context("Failed to create agent")?;

    match agent.refresh_tools().await {
        Ok(set) => println!("{} tools available from {}", set.len(), cfg.mcp.server_url),
        Err(e) => println!(
            "MCP server not reachable yet ({e}); tools will be retried on the first message"
        ),
    }

    let mut session_id = uuid::Uuid::new_v4().to_string();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                agent.reset_session(&session_id).await;
                session_id = uuid::Uuid::new_v4().to_string();
                println!("(session reset)");
            }
            "/tools" => {
                let set = agent.tools().await;
                if set.is_empty() {
                    println!("(no tools loaded)");
                }
                for tool in set.iter() {
                    println!("- {}: {}", tool.name, tool.description);
                }
            }
            "/refresh" => match agent.refresh_tools().await {
                Ok(set) => println!("{} tools loaded", set.len()),
                Err(e) => println!("refresh failed: {e}"),
            },
            text => {
                let reply = agent.handle_turn(&session_id, text).await?;
                for call in &reply.tool_calls {
                    let mark = if call.ok { "ok" } else { "failed" };
                    println!("  [{}] {} ({} ms)", mark, call.tool, call.elapsed_ms);
                }
                println!("{}", reply.message);
            }
        }
    }

    let (prompt, completion, total) = agent.token_usage();
    tracing::info!(prompt, completion, total, "session finished");
    Ok(())
}
