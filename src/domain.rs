use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;
use std::fmt;
use std::io::Error;
use std::path::PathBuf;

pub const HELP_TEXT: &str = "\
aifa-tv keys

  q            quit
  h j k l      move (arrows work too)
  PgUp PgDn    page up / down
  g G          first / last row
  0 $          first / last column
  Enter        open record view
  Esc          leave record view / close popup
  /            search all columns
  f            filter current column
  F            clear search and all filters
  [ ]          sort ascending / descending
  c C          collapse / expand column
  i            toggle row index
  y Y          copy cell / row
  ?            this help

filter popover

  j k          move
  Space        toggle option
  a            select all (unrestricted)
  n            deselect all
  x            clear column filter
  Esc q        close
";

#[derive(Debug)]
pub enum TVError {
    IoError(Error),
    PolarsError(PolarsError),
    JsonError(serde_json::Error),
    LoadingFailed(String),
    InvalidArgument(String),
    FileNotFound,
    PermissionDenied,
    UnknownFileType,
}

impl fmt::Display for TVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TVError::IoError(e) => write!(f, "io error: {e}"),
            TVError::PolarsError(e) => write!(f, "could not read table: {e}"),
            TVError::JsonError(e) => write!(f, "invalid json: {e}"),
            TVError::LoadingFailed(msg) => write!(f, "loading failed: {msg}"),
            TVError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            TVError::FileNotFound => write!(f, "file not found"),
            TVError::PermissionDenied => write!(f, "permission denied"),
            TVError::UnknownFileType => write!(f, "unknown file type"),
        }
    }
}

impl std::error::Error for TVError {}

impl From<Error> for TVError {
    fn from(err: Error) -> Self {
        TVError::IoError(err)
    }
}

impl From<PolarsError> for TVError {
    fn from(err: PolarsError) -> Self {
        TVError::PolarsError(err)
    }
}

impl From<serde_json::Error> for TVError {
    fn from(err: serde_json::Error) -> Self {
        TVError::JsonError(err)
    }
}

/// Runtime settings, defaulted and then overridden from the command line.
#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct TVConfig {
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub log_file: PathBuf,
}

impl Default for TVConfig {
    fn default() -> Self {
        TVConfig {
            event_poll_time: 100,
            max_column_width: 30,
            log_file: PathBuf::from("aifa-tv.log"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CMDMode {
    Search,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    MoveToFirstColumn,
    MoveToLastColumn,
    Resize(usize, usize),
    Enter,
    Exit,
    Help,
    Search,
    ClearFilters,
    OpenFilter,
    ClosePopover,
    ToggleOption,
    SelectAll,
    DeselectAll,
    ClearColumnFilter,
    SortAscending,
    SortDescending,
    ToggleColumnState,
    ToggleExpandColumnState,
    ToggleIndex,
    CopyCell,
    CopyRow,
    RawKey(KeyEvent),
}
