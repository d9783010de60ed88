// runtime configuration (bind address, codec binary, limits)
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub codec_bin: String,
    pub codec_timeout_ms: u64,
    pub body_limit: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1:3000")] pub bind_addr: String,
    #[arg(long, default_value = "./converter.bin")] pub codec_bin: String,
    #[arg(long, default_value_t = 5000)]            pub codec_timeout_ms: u64,
    #[arg(long, default_value_t = 5 * 1024 * 1024)] pub body_limit: usize,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        let c = <Cli as Parser>::parse();
        Ok(Config {
            bind_addr: c.bind_addr,
            codec_bin: c.codec_bin,
            codec_timeout_ms: c.codec_timeout_ms,
            body_limit: c.body_limit,
        })
    }
}
