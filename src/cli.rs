use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "asclepius")]
#[command(version, about = "Classify photos for cancer risk and keep a history of saved results")]
pub struct Cli {
    /// Config file (default: the platform config dir's asclepius/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long)]
    pub bind: Option<String>,

    /// ONNX model file
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Labels file, one label per line
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Where the history database and saved images live
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}
