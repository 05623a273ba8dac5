use std::path::PathBuf;

use clap::Parser;

/// Webhook server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "sizing-webhook", about = "Node-proportional pod resource sizing webhook")]
pub(crate) struct WebhookArgs {
    #[arg(
        long,
        env = "WEBHOOK_LISTEN_ADDR",
        default_value = "0.0.0.0:8443",
        help = "Address the HTTPS admission endpoint binds to"
    )]
    pub listen_addr: String,

    #[arg(
        long,
        env = "WEBHOOK_TLS_CERT_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.crt",
        help = "x509 certificate for the HTTPS endpoint"
    )]
    pub tls_cert_file: PathBuf,

    #[arg(
        long,
        env = "WEBHOOK_TLS_KEY_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.key",
        help = "x509 private key matching the certificate"
    )]
    pub tls_key_file: PathBuf,

    #[arg(
        long,
        env = "KUBECONFIG_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubeconfig to reach the cluster with (default: in-cluster or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "WEBHOOK_FAIL_OPEN",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Admit pods unchanged when sizing fails, instead of denying them"
    )]
    pub fail_open: bool,
}
