use anyhow::anyhow;
use clap::Parser;
use log::{error, info};
use prometheus::{BasicAuthentication, labels};
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::{Duration, sleep};

use crate::cli::{SubCommandExtend, open_searcher};
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl ServerCommand {
    /// 解析 prometheus 认证信息，返回 (username, password)
    fn push_auth(&self) -> anyhow::Result<Option<(String, String)>> {
        let Some(auth) = &self.prometheus_auth else {
            return Ok(None);
        };
        let (username, password) =
            auth.split_once(':').ok_or_else(|| anyhow!("prometheus 认证信息格式错误"))?;
        Ok(Some((username.to_string(), password.to_string())))
    }
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let searcher = open_searcher(opts).await?;
        info!("数据库中共有 {} 条记录", searcher.count().await?);

        let token = match self.token.is_empty() {
            true => {
                let token = Alphanumeric.sample_string(&mut rand::rng(), 32);
                info!("鉴权 token: {}", token);
                token
            }
            false => self.token.clone(),
        };

        let state = server::AppState::new(searcher, token);
        let app = server::create_app(state);

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            let auth = self.push_auth()?;
            tokio::spawn(async move {
                loop {
                    let metric_families = prometheus::gather();
                    let (url, instance, auth) = (url.clone(), instance.clone(), auth.clone());
                    let r = spawn_blocking(move || {
                        prometheus::push_metrics(
                            "immatch",
                            labels! {
                                "instance".to_string() => instance,
                            },
                            &url,
                            metric_families,
                            auth.map(|(username, password)| BasicAuthentication {
                                username,
                                password,
                            }),
                        )
                    })
                    .await;
                    match r {
                        Ok(Err(e)) => error!("推送指标失败: {e}"),
                        Err(e) => error!("推送任务异常退出: {e}"),
                        Ok(Ok(())) => {}
                    }
                    sleep(Duration::from_secs(30)).await;
                }
            });
        }

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_auth() {
        let cmd = ServerCommand::try_parse_from(["server", "--prometheus-auth", "user:p:ss"]).unwrap();
        assert_eq!(cmd.push_auth().unwrap(), Some(("user".to_string(), "p:ss".to_string())));

        let cmd = ServerCommand::try_parse_from(["server"]).unwrap();
        assert_eq!(cmd.push_auth().unwrap(), None);

        let cmd = ServerCommand::try_parse_from(["server", "--prometheus-auth", "user"]).unwrap();
        assert!(cmd.push_auth().is_err());
    }
}
