use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value_t = false, global = true)]
    enable_timing: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the suitability and cost model
    Run {
        #[arg(short, long, help = "JSON run configuration; defaults are used when omitted")]
        config: Option<String>,

        #[arg(long, help = "Criterion table, overrides the configuration")]
        criteria: Option<String>,

        #[arg(short, long, help = "Input layer directory, overrides the configuration")]
        input_dir: Option<String>,

        #[arg(short, long, help = "Output root, overrides the configuration")]
        output_dir: Option<String>,

        #[arg(long, default_value_t = 20, help = "Polygons to list in the console table")]
        top: usize,

        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// Write a skeleton criterion table for the layers in a directory
    Template {
        #[arg(short, long)]
        input_dir: String,

        #[arg(short, long, default_value = "criteria.csv")]
        output: String,
    },
    /// Copy raster tiles overlapping an AOI into one directory
    Tiles {
        #[arg(short, long)]
        root: String,

        #[arg(long, help = "AOI polygons whose bounds select the tiles")]
        aoi: String,

        #[arg(short, long)]
        dest: String,

        #[arg(short, long, help = "Worker threads; rayon's default when omitted")]
        workers: Option<usize>,
    },
}

impl Args {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn enable_timing(&self) -> bool {
        self.enable_timing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::parse_from(["sitetool", "run", "-c", "run.json", "--top", "5", "--enable-timing"]);
        assert!(args.enable_timing());
        match args.command() {
            Command::Run { config, top, verbose, .. } => {
                assert_eq!(config.as_deref(), Some("run.json"));
                assert_eq!(*top, 5);
                assert!(!verbose);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_tiles() {
        let args = Args::parse_from(["sitetool", "tiles", "-r", "/tiles", "--aoi", "aoi.json", "-d", "out", "-w", "4"]);
        match args.command() {
            Command::Tiles { root, workers, .. } => {
                assert_eq!(root, "/tiles");
                assert_eq!(*workers, Some(4));
            }
            _ => panic!("expected tiles"),
        }
    }
}
