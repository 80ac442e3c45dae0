use clap::Parser;
use ratatui::DefaultTerminal;
use ratatui::crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use ratatui::crossterm::execute;
use std::fs::File;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use aifa_tv::controller::Controller;
use aifa_tv::domain::{TVConfig, TVError};
use aifa_tv::filter::ColumnFilters;
use aifa_tv::model::{Model, Status};
use aifa_tv::ui::TableUI;
use aifa_tv::{headless, loader};

/// Terminal table viewer with free text search and per column value filters.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Table to open (csv, parquet, arrow/ipc/feather or a json array of objects)
    path: String,

    /// Widest a column is drawn before it is truncated
    #[arg(long)]
    max_column_width: Option<usize>,

    /// Milliseconds to wait for terminal events per loop
    #[arg(long)]
    event_poll_time: Option<u64>,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Initial search query
    #[arg(short, long, default_value = "")]
    query: String,

    /// Column filter as column=token,token. An empty token list hides every row.
    #[arg(short, long = "filter", value_name = "COLUMN=TOKENS")]
    filters: Vec<String>,

    /// Print the visible rows as csv instead of starting the viewer
    #[arg(long)]
    print: bool,

    /// Print the filter options of a column instead of starting the viewer
    #[arg(long, value_name = "COLUMN")]
    facets: Option<String>,
}

impl Args {
    fn config(&self) -> TVConfig {
        let mut config = TVConfig::default();
        if let Some(width) = self.max_column_width {
            config = config.with_max_column_width(width);
        }
        if let Some(poll_time) = self.event_poll_time {
            config = config.with_event_poll_time(poll_time);
        }
        if let Some(log_file) = &self.log_file {
            config = config.with_log_file(log_file.clone());
        }
        config
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Err(e) => {
            error!("Exiting with error: {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn setup_logging(log_file: &Path) -> Result<(), TVError> {
    let file = File::create(log_file)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn run(args: Args) -> Result<(), TVError> {
    let config = args.config();
    setup_logging(&config.log_file)?;
    info!("Starting aifa-tv with {config:?}");

    let path = PathBuf::from(
        shellexpand::full(&args.path)
            .map_err(|e| TVError::InvalidArgument(e.to_string()))?
            .as_ref(),
    );
    let filters = headless::build_filters(&args.filters)?;

    if args.print || args.facets.is_some() {
        return run_headless(path, &args, &filters);
    }

    let mut terminal = ratatui::init();
    let result = execute!(stdout(), EnableMouseCapture)
        .map_err(TVError::from)
        .and_then(|_| run_app(&mut terminal, &config, path, &args.query, filters));
    if let Err(e) = execute!(stdout(), DisableMouseCapture) {
        error!("Could not disable mouse capture: {e}");
    }
    ratatui::restore();
    result
}

fn run_headless(path: PathBuf, args: &Args, filters: &ColumnFilters) -> Result<(), TVError> {
    let dataset = loader::load_dataset(path)?;
    let out = match &args.facets {
        Some(column) => headless::render_facets(&dataset, column, filters)?,
        None => headless::render_rows(&dataset, &args.query, filters),
    };
    print!("{out}");
    Ok(())
}

fn run_app(
    terminal: &mut DefaultTerminal,
    config: &TVConfig,
    path: PathBuf,
    query: &str,
    filters: ColumnFilters,
) -> Result<(), TVError> {
    let size = terminal.size()?;
    let mut model = Model::init(config, size.width as usize, size.height as usize);
    model.load_data_file(path)?;
    for (column, selection) in filters.selections() {
        model.set_filter(column, Some(selection.clone()));
    }
    model.set_query(query);

    let ui = TableUI::new();
    let controller = Controller::new(config);

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message
        let message = controller.handle_event(&model)?;
        model.update(message)?;
    }
    info!("Bye!");
    Ok(())
}
