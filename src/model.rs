use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use ratatui::layout::Rect;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::dataset::Dataset;
use crate::domain::{CMDMode, HELP_TEXT, Message, TVConfig, TVError};
use crate::filter::{ColumnFilters, FilterState};
use crate::inputter::{InputResult, Inputter};
use crate::loader;
use crate::popover::{FilterPopover, ListenerRegistry};
use crate::ui::{
    CMDLINE_HEIGH, COLUMN_WIDTH_COLLAPSED_COLUMN, COLUMN_WIDTH_MARGIN, SCROLLBAR_WIDTH,
    TABLE_HEADER_HEIGHT,
};
use crate::value::Value;

#[derive(Debug, PartialEq)]
pub enum Status {
    EMPTY,
    READY,
    QUITTING,
}

/// Display form of one dataset column.
pub struct Column {
    name: String,
    status: ColumnStatus,
    max_width: usize,
    render_width: usize,
    data: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
    pub filtered: bool,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ColumnStatus {
    NORMAL,
    EXPANDED,
    COLLAPSED,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    RECORD,
    POPUP,
    CMDINPUT,
    FILTER,
}

pub struct TableView {
    name: String,
    rows: Arc<Vec<usize>>, // Visible rows, mapped to dataset row index
    visible_columns: Vec<usize>,
    visible_width: usize,
    curser_row: usize,
    curser_column: usize,
    offset_row: usize,
    offset_column: usize,
    data: Vec<ColumnView>,
    show_index: bool,
    index: ColumnView,
    heigh: usize,
    width: usize,
}

impl TableView {
    fn empty() -> Self {
        TableView {
            name: String::new(),
            rows: Arc::new(Vec::new()),
            visible_columns: Vec::new(),
            visible_width: 0,
            curser_column: 0,
            curser_row: 0,
            offset_column: 0,
            offset_row: 0,
            data: Vec::new(),
            show_index: false,
            index: ColumnView::default(),
            heigh: 0,
            width: 0,
        }
    }

    fn build_index(&mut self) {
        let rbegin = self.offset_row.min(self.rows.len());
        let rend = std::cmp::min(rbegin + self.heigh, self.rows.len());

        let data = self.rows[rbegin..rend]
            .iter()
            .map(|idx| (idx + 1).to_string())
            .collect::<Vec<String>>();
        let width = data.iter().map(|s| s.len()).max().unwrap_or(3);
        self.index = ColumnView {
            name: "#".to_string(),
            width,
            data,
            filtered: false,
        }
    }

    fn abs_row(&self) -> usize {
        self.offset_row + self.curser_row
    }
}

struct RecordView {
    record_idx: usize, // Index in TableView.rows
    header_data: Vec<String>,
    header_width: usize,
    header_view: ColumnView,
    row_data: Vec<String>,
    row_view: ColumnView,
    curser_row: usize,
    curser_offset: usize,
    height: usize,
    width: usize,
}

impl RecordView {
    fn empty() -> Self {
        RecordView {
            record_idx: 0,
            header_data: Vec::new(),
            header_width: 0,
            header_view: ColumnView::default(),
            row_data: Vec::new(),
            row_view: ColumnView::default(),
            curser_row: 0,
            curser_offset: 0,
            height: 0,
            width: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PopoverItem {
    pub selected: bool,
    pub label: String,
    pub count: usize,
}

#[derive(Clone, Debug)]
pub struct PopoverData {
    pub title: String,
    pub area: Rect,
    pub items: Vec<PopoverItem>,
    pub cursor: usize, // Relative to items
    pub state: FilterState,
}

pub struct UIData {
    pub name: String,
    pub table: Vec<ColumnView>,
    pub index: ColumnView,
    pub nrows: usize, // Rows passing search and filters
    pub total_rows: usize,
    pub selected_row: usize,
    pub selected_column: usize,
    pub abs_selected_row: usize,
    pub show_popup: bool,
    pub popup_message: String,
    pub layout: UILayout,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub status_message: String,
    pub query: String,
    pub active_filters: usize,
    pub filter_popover: Option<PopoverData>,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            table: Vec::new(),
            index: ColumnView::default(),
            nrows: 0,
            total_rows: 0,
            selected_row: 0,
            selected_column: 0,
            abs_selected_row: 0,
            show_popup: false,
            popup_message: String::new(),
            layout: UILayout::default(),
            cmdinput: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            status_message: String::new(),
            query: String::new(),
            active_filters: 0,
            filter_popover: None,
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_width: usize,
    pub table_height: usize,
    pub index_width: usize,
    pub statusline_height: usize,
}

impl UILayout {
    pub fn from_values(index_width: usize, ui_width: usize, ui_height: usize) -> Self {
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width: ui_width.saturating_sub(SCROLLBAR_WIDTH + index_width),
            table_height: ui_height.saturating_sub(CMDLINE_HEIGH + TABLE_HEADER_HEIGHT),
            index_width,
            statusline_height: CMDLINE_HEIGH,
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }

    /// Area the table occupies, popovers are kept inside it.
    pub fn viewport(&self) -> Rect {
        Rect::new(
            0,
            0,
            self.width.min(u16::MAX as usize) as u16,
            self.height.saturating_sub(CMDLINE_HEIGH).min(u16::MAX as usize) as u16,
        )
    }
}

/// Quote a cell for CSV output when it needs it.
pub fn wrap_cell_content(c: &str) -> String {
    let needs_escaping = c.contains('"');
    let needs_wrapping = c.chars().any(|c| matches!(c, ' ' | '\t' | ',' | '\n' | '"'));
    let mut out = String::from(c);

    if needs_escaping {
        out = out.replace('"', "\"\"");
    }
    if needs_wrapping {
        out = format!("\"{out}\"");
    }
    out
}

pub struct Model {
    config: TVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    dataset: Dataset,
    columns: Vec<Column>,
    row_order: Vec<usize>, // Dataset rows in display order, changed by sorting
    table: TableView,
    record_view: RecordView,
    query: String,
    query_before_edit: String,
    filters: ColumnFilters,
    popover: Option<FilterPopover>,
    listeners: ListenerRegistry,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    status_message: String,
}

impl Model {
    pub fn init(config: &TVConfig, ui_width: usize, ui_height: usize) -> Self {
        let clipboard = Clipboard::new()
            .map_err(|e| warn!("Clipboard not available: {e}"))
            .ok();
        let mut model = Self {
            config: config.clone(),
            status: Status::EMPTY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            dataset: Dataset::empty(),
            columns: Vec::new(),
            row_order: Vec::new(),
            table: TableView::empty(),
            record_view: RecordView::empty(),
            query: String::new(),
            query_before_edit: String::new(),
            filters: ColumnFilters::new(),
            popover: None,
            listeners: ListenerRegistry::new(),
            uilayout: UILayout::from_values(0, ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            status_message: "Started aifa-tv!".to_string(),
        };
        model.update_table_data();
        model
    }

    pub fn load_data_file(&mut self, path: PathBuf) -> Result<(), TVError> {
        let start_time = Instant::now();
        let dataset = loader::load_dataset(path)?;
        let loading_duration = start_time.elapsed().as_millis();
        info!("Loading data took {loading_duration}ms ...");
        self.set_dataset(dataset);
        self.set_status_message(format!("Loaded data in {loading_duration}ms ..."));
        Ok(())
    }

    /// Swap the displayed table. Search, filters and any open popover belong to the
    /// previous table and are reset.
    pub fn set_dataset(&mut self, dataset: Dataset) {
        self.popover = None;
        self.query.clear();
        self.filters.clear_all();
        self.columns = Self::build_columns(&dataset, self.config.max_column_width);
        for c in self.columns.iter() {
            debug!(
                "Column \"{}\", width_max: {}, # rows {}",
                c.name,
                c.max_width,
                c.data.len()
            );
        }
        self.row_order = (0..dataset.len()).collect();
        self.table = TableView::empty();
        self.table.name = dataset.name.clone();
        self.dataset = dataset;
        self.modus = Modus::TABLE;
        self.status = Status::READY;
        self.apply_filters();
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.apply_filters();
    }

    pub fn set_filter(&mut self, column: &str, selection: Option<HashSet<String>>) {
        self.filters.set_selection(column, selection);
        self.apply_filters();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn filters(&self) -> &ColumnFilters {
        &self.filters
    }

    pub fn visible_rows(&self) -> &[usize] {
        &self.table.rows
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn is_filter_open(&self) -> bool {
        self.popover.is_some()
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    fn build_columns(dataset: &Dataset, max_column_width: usize) -> Vec<Column> {
        dataset
            .columns
            .par_iter()
            .enumerate()
            .map(|(cidx, name)| {
                let data: Vec<String> = (0..dataset.len())
                    .map(|ridx| {
                        dataset
                            .cell(ridx, cidx)
                            .to_string()
                            .replace("\r\n", " ↵ ")
                            .replace('\n', " ↵ ")
                    })
                    .collect();
                let max_width = data.iter().map(|s| s.chars().count()).max().unwrap_or(0);
                let mut column = Column {
                    name: name.clone(),
                    status: ColumnStatus::NORMAL,
                    max_width,
                    render_width: 0,
                    data,
                };
                column.render_width = Self::calculate_column_width(&column, max_column_width);
                column
            })
            .collect()
    }

    /// Recompute visible rows from the current query and column filters.
    fn apply_filters(&mut self) {
        let start_time = Instant::now();
        let visible = self.dataset.visible_rows(&self.query, &self.filters);
        let mut mask = vec![false; self.dataset.len()];
        for idx in visible {
            mask[idx] = true;
        }
        let rows: Vec<usize> = self.row_order.iter().copied().filter(|&r| mask[r]).collect();
        debug!(
            "Filtering kept {}/{} rows in {}ms",
            rows.len(),
            self.dataset.len(),
            start_time.elapsed().as_millis()
        );
        self.table.rows = Arc::new(rows);
        self.table.offset_row = 0;
        self.table.curser_row = 0;
        self.update_table_data();
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.uidata.status_message = self.status_message.clone();
    }

    fn update_uidata_for_table(&mut self) {
        let table = &self.table;
        self.uidata = UIData {
            name: table.name.clone(),
            table: table.data.clone(),
            index: if table.show_index {
                table.index.clone()
            } else {
                ColumnView::default()
            },
            nrows: table.rows.len(),
            total_rows: self.dataset.len(),
            selected_row: table.curser_row,
            selected_column: table.curser_column,
            abs_selected_row: table.abs_row(),
            show_popup: false,
            popup_message: String::new(),
            layout: self.uilayout.clone(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
            query: self.query.clone(),
            active_filters: self.filters.active_count(),
            filter_popover: None,
        };
        self.update_uidata_for_popover();
    }

    fn update_uidata_for_popover(&mut self) {
        self.uidata.filter_popover = self.popover.as_ref().map(|popover| PopoverData {
            title: popover.column.clone(),
            area: popover.area,
            items: popover
                .visible_options()
                .iter()
                .map(|o| PopoverItem {
                    selected: self.filters.is_selected(&popover.column, &o.token),
                    label: o.label.clone(),
                    count: o.count,
                })
                .collect(),
            cursor: popover.cursor - popover.offset,
            state: self.filters.state(&popover.column),
        });
    }

    fn update_uidata_for_record(&mut self) {
        let record = &self.record_view;
        self.uidata = UIData {
            name: format!("R[{}]", self.table.name),
            table: vec![record.header_view.clone(), record.row_view.clone()],
            index: ColumnView::default(),
            nrows: record.row_data.len(),
            total_rows: self.dataset.len(),
            selected_row: record.curser_row,
            selected_column: 1,
            abs_selected_row: record.curser_offset + record.curser_row,
            show_popup: false,
            popup_message: String::new(),
            layout: self.uilayout.clone(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: format!(
                "Record {}/{}",
                record.record_idx + 1,
                self.table.rows.len()
            ),
            query: self.query.clone(),
            active_filters: self.filters.active_count(),
            filter_popover: None,
        };
    }

    fn get_visible_name(name: &str, width: usize) -> String {
        if width < 3 {
            return String::new();
        }
        if name.chars().count() > width {
            let mut reduced: String = name.chars().take(width - 3).collect();
            reduced.push_str("...");
            reduced
        } else {
            name.to_string()
        }
    }

    fn calculate_column_width(column: &Column, max_column_width: usize) -> usize {
        let width =
            std::cmp::max(column.name.chars().count(), column.max_width) + COLUMN_WIDTH_MARGIN;
        match column.status {
            ColumnStatus::COLLAPSED => COLUMN_WIDTH_COLLAPSED_COLUMN,
            ColumnStatus::NORMAL => std::cmp::min(width, max_column_width),
            ColumnStatus::EXPANDED => width,
        }
    }

    fn update_table_data(&mut self) {
        let table = &mut self.table;
        table.width = self.uilayout.table_width;
        table.heigh = self.uilayout.table_height;

        let nrows = table.rows.len();
        if nrows == 0 {
            table.offset_row = 0;
            table.curser_row = 0;
        } else {
            if table.offset_row >= nrows {
                table.offset_row = nrows.saturating_sub(table.heigh.max(1));
            }
            let last_row_on_screen = std::cmp::min(table.heigh, nrows - table.offset_row);
            table.curser_row = std::cmp::min(table.curser_row, last_row_on_screen.saturating_sub(1));
        }

        for column in self.columns.iter_mut() {
            column.render_width =
                Self::calculate_column_width(column, self.config.max_column_width);
        }

        // Fit as many columns as possible, the last one may be partially visible
        table.offset_column = std::cmp::min(table.offset_column, self.columns.len().saturating_sub(1));
        table.visible_columns.clear();
        let mut visible_width = 0;
        for (cidx, column) in self.columns.iter_mut().enumerate().skip(table.offset_column) {
            if visible_width + column.render_width + 1 <= table.width {
                table.visible_columns.push(cidx);
                visible_width += column.render_width + 1;
            } else {
                if visible_width < table.width {
                    let remaining_width = table.width - visible_width;
                    table.visible_columns.push(cidx);
                    visible_width += remaining_width;
                    column.render_width = remaining_width;
                }
                break;
            }
        }
        table.visible_width = visible_width;
        table.curser_column =
            std::cmp::min(table.curser_column, table.visible_columns.len().saturating_sub(1));

        let rbegin = table.offset_row;
        let rend = std::cmp::min(rbegin + table.heigh, nrows);
        let rows = &table.rows[rbegin..rend];
        table.data = table
            .visible_columns
            .iter()
            .map(|&cidx| {
                let column = &self.columns[cidx];
                let data = match column.status {
                    ColumnStatus::COLLAPSED => vec!["⋮".to_string(); rows.len()],
                    _ => rows.iter().map(|&r| column.data[r].clone()).collect(),
                };
                ColumnView {
                    name: Self::get_visible_name(&column.name, column.render_width),
                    width: column.render_width,
                    data,
                    filtered: self.filters.selection(&column.name).is_some(),
                }
            })
            .collect();

        trace!(
            "Table: I:{}, Cr {}, Cc {}, Or {}, Oc {}, Rb {}, Re {}, tw: {}, th:{}",
            table.show_index,
            table.curser_row,
            table.curser_column,
            table.offset_row,
            table.offset_column,
            rbegin,
            rend,
            table.width,
            table.heigh,
        );

        table.build_index();
        self.update_uidata_for_table();
    }

    fn build_record_view(&mut self, record_idx: usize) {
        trace!("Building record view for {record_idx} ...");
        let record = &mut self.record_view;
        record.header_data = self
            .columns
            .iter()
            .map(|c| {
                c.name
                    .chars()
                    .take(self.config.max_column_width)
                    .collect::<String>()
            })
            .collect();
        record.curser_offset = 0;
        record.curser_row = 0;
        record.record_idx = record_idx;
        record.height = self.uilayout.table_height;
        record.width = self.uilayout.table_width + self.uilayout.index_width;
        record.header_width = record
            .header_data
            .iter()
            .map(|h| h.chars().count())
            .max()
            .unwrap_or(0);

        self.update_record_data();
    }

    fn update_record_data(&mut self) {
        let Some(&row) = self.table.rows.get(self.record_view.record_idx) else {
            return;
        };
        let record = &mut self.record_view;
        record.row_data = self.columns.iter().map(|c| c.data[row].clone()).collect();

        let rbegin = record.curser_offset;
        let rend = std::cmp::min(rbegin + record.height, record.row_data.len());
        record.header_view = ColumnView {
            name: "Column".to_string(),
            data: record.header_data[rbegin..rend].to_vec(),
            width: record.header_width,
            filtered: false,
        };
        record.row_view = ColumnView {
            name: "Value".to_string(),
            data: record.row_data[rbegin..rend].to_vec(),
            width: record.width.saturating_sub(record.header_width + 1),
            filtered: false,
        };
        self.update_uidata_for_record();
    }

    pub fn quit(&mut self) {
        self.popover = None;
        self.status = Status::QUITTING;
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        let index_width = if self.table.show_index {
            self.table.index.width + 1
        } else {
            0
        };
        self.uilayout = UILayout::from_values(index_width, width, height);
        match self.modus {
            Modus::RECORD => {
                self.record_view.height = self.uilayout.table_height;
                self.record_view.width = self.uilayout.table_width + self.uilayout.index_width;
                self.update_record_data();
            }
            _ => self.update_table_data(),
        }
        if self.listeners.wants_reposition() {
            self.reposition_popover();
        }
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), TVError> {
        let Some(msg) = message else {
            return Ok(());
        };
        trace!("Update: Modus {:?}, Message {:?}", self.modus, msg);
        match self.modus {
            Modus::TABLE => match msg {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_table_selection_down(1),
                Message::MoveUp => self.move_table_selection_up(1),
                Message::MoveLeft => self.move_table_selection_left(),
                Message::MoveRight => self.move_table_selection_right(),
                Message::MovePageUp => self.move_table_selection_up(self.uilayout.table_height),
                Message::MovePageDown => {
                    self.move_table_selection_down(self.uilayout.table_height)
                }
                Message::MoveBeginning => self.select_row(0),
                Message::MoveEnd => self.select_row(self.table.rows.len().saturating_sub(1)),
                Message::MoveToFirstColumn => self.select_cell(self.table.abs_row(), 0),
                Message::MoveToLastColumn => self.select_cell(
                    self.table.abs_row(),
                    self.columns.len().saturating_sub(1),
                ),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Enter => self.open_record_view(),
                Message::Help => self.show_help(),
                Message::Search => self.enter_cmd_mode(CMDMode::Search),
                Message::ClearFilters => self.clear_filters(),
                Message::OpenFilter => self.open_filter_popover(),
                Message::SortAscending => self.sort_current_column(true),
                Message::SortDescending => self.sort_current_column(false),
                Message::ToggleColumnState => self.toggle_column_status(false),
                Message::ToggleExpandColumnState => self.toggle_column_status(true),
                Message::ToggleIndex => self.toggle_table_index(),
                Message::CopyCell => self.copy_table_cell(),
                Message::CopyRow => self.copy_table_row(),
                _ => (),
            },
            Modus::RECORD => match msg {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_record_selection_down(1),
                Message::MoveUp => self.move_record_selection_up(1),
                Message::MovePageDown => self.move_record_selection_down(10),
                Message::MovePageUp => self.move_record_selection_up(10),
                Message::MoveLeft => self.previous_record(),
                Message::MoveRight => self.next_record(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::CopyCell => self.copy_record_cell(),
                Message::Help => self.show_help(),
                Message::Exit => self.exit(),
                _ => (),
            },
            Modus::POPUP => match msg {
                Message::Quit => self.quit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Exit | Message::ClosePopover => self.exit(),
                _ => (),
            },
            Modus::FILTER => match msg {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_popover_cursor(1),
                Message::MoveUp => self.move_popover_cursor(-1),
                Message::MovePageDown => self.move_popover_page(1),
                Message::MovePageUp => self.move_popover_page(-1),
                Message::ToggleOption | Message::Enter => self.toggle_selected_option(),
                Message::SelectAll => self.update_current_filter(FilterChange::SelectAll),
                Message::DeselectAll => self.update_current_filter(FilterChange::DeselectAll),
                Message::ClearColumnFilter => self.update_current_filter(FilterChange::Clear),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Exit | Message::ClosePopover => self.exit(),
                _ => (),
            },
            Modus::CMDINPUT => match msg {
                Message::RawKey(key) => self.raw_input(key),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
        }
        Ok(())
    }

    // -------------------- Control handling functions ---------------------- //

    fn open_record_view(&mut self) {
        if self.table.rows.is_empty() {
            self.set_status_message("No row to show");
            self.update_uidata_for_table();
            return;
        }
        let record_idx = self.table.abs_row();
        self.build_record_view(record_idx);
        self.previous_modus = Modus::TABLE;
        self.modus = Modus::RECORD;
    }

    fn exit(&mut self) {
        match self.modus {
            Modus::TABLE | Modus::CMDINPUT => {}
            Modus::RECORD => {
                self.previous_modus = Modus::RECORD;
                self.modus = Modus::TABLE;
                self.update_table_data();
            }
            Modus::POPUP => {
                trace!("Close popup ...");
                self.modus = self.previous_modus;
                self.previous_modus = Modus::POPUP;
                self.uidata.show_popup = false;
            }
            Modus::FILTER => {
                trace!("Close filter popover ...");
                self.popover = None;
                self.previous_modus = Modus::FILTER;
                self.modus = Modus::TABLE;
                self.update_table_data();
            }
        }
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.uidata.popup_message = HELP_TEXT.to_string();
        self.uidata.show_popup = true;
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if !self.active_cmdinput {
            return;
        }
        self.last_input = self.input.read(key);
        if self.last_input.finished {
            self.handle_cmd_input();
        } else if self.cmd_mode == Some(CMDMode::Search) {
            // Search as you type
            self.query = self.last_input.input.clone();
            self.apply_filters();
        } else {
            self.uidata.cmdinput = self.last_input.clone();
        }
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {mode:?} ...");
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);
        self.active_cmdinput = true;
        self.query_before_edit = self.query.clone();

        self.input.clear();
        self.input.set(&self.query);
        self.last_input = self.input.get();
        self.uidata.cmdinput = self.last_input.clone();
        self.uidata.active_cmdinput = self.active_cmdinput;
        self.uidata.cmd_mode = self.cmd_mode;
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {:?}", self.last_input);
        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;

        match self.cmd_mode.take() {
            Some(CMDMode::Search) => {
                if self.last_input.canceled {
                    self.query = self.query_before_edit.clone();
                } else {
                    self.query = self.last_input.input.trim().to_string();
                }
                self.apply_filters();
                let message = if self.query.is_empty() {
                    "Search cleared".to_string()
                } else {
                    format!(
                        "{} of {} rows match \"{}\"",
                        self.table.rows.len(),
                        self.dataset.len(),
                        self.query
                    )
                };
                self.set_status_message(message);
            }
            None => info!("Cmd mode is none!"),
        }
        self.last_input = InputResult::default();
        self.update_table_data();
    }

    fn clear_filters(&mut self) {
        self.query.clear();
        self.filters.clear_all();
        self.apply_filters();
        self.set_status_message("Cleared search and filters");
    }

    fn current_column(&self) -> Option<usize> {
        self.table
            .visible_columns
            .get(self.table.curser_column)
            .copied()
    }

    /// Screen area of the current column's header cell.
    fn current_header_rect(&self) -> Rect {
        let index_width = if self.table.show_index {
            self.table.index.width + 1
        } else {
            0
        };
        let x = index_width
            + self.table.data[..self.table.curser_column.min(self.table.data.len())]
                .iter()
                .map(|c| c.width + 1)
                .sum::<usize>();
        let width = self
            .table
            .data
            .get(self.table.curser_column)
            .map(|c| c.width)
            .unwrap_or(1);
        Rect::new(
            x.min(u16::MAX as usize) as u16,
            0,
            width.min(u16::MAX as usize) as u16,
            TABLE_HEADER_HEIGHT as u16,
        )
    }

    fn open_filter_popover(&mut self) {
        let Some(column_idx) = self.current_column() else {
            return;
        };
        let column = self.columns[column_idx].name.clone();
        let start_time = Instant::now();
        let options = self.dataset.facet_options(&column);
        debug!(
            "Facets for {column}: {} options in {}ms",
            options.len(),
            start_time.elapsed().as_millis()
        );
        self.popover = Some(FilterPopover::open(
            &self.listeners,
            &column,
            options,
            self.current_header_rect(),
            self.uilayout.viewport(),
        ));
        self.previous_modus = self.modus;
        self.modus = Modus::FILTER;
        self.update_uidata_for_table();
    }

    fn reposition_popover(&mut self) {
        let anchor = self.current_header_rect();
        let viewport = self.uilayout.viewport();
        if let Some(popover) = self.popover.as_mut() {
            popover.reposition(anchor, viewport);
        }
        self.update_uidata_for_popover();
    }

    fn move_popover_cursor(&mut self, delta: isize) {
        if let Some(popover) = self.popover.as_mut() {
            popover.move_cursor(delta);
        }
        self.update_uidata_for_popover();
    }

    fn move_popover_page(&mut self, direction: isize) {
        let page = self
            .popover
            .as_ref()
            .map(|p| p.page_size() as isize)
            .unwrap_or(1);
        self.move_popover_cursor(direction * page);
    }

    fn toggle_selected_option(&mut self) {
        let Some(popover) = self.popover.as_ref() else {
            return;
        };
        let Some(option) = popover.selected() else {
            return;
        };
        let state =
            self.filters
                .toggle_token(&popover.column, &option.token, &popover.observed_tokens());
        let message = format!("{}: {}", popover.column, describe_state(state));
        self.apply_filters();
        self.set_status_message(message);
    }

    fn update_current_filter(&mut self, change: FilterChange) {
        let Some(column) = self.popover.as_ref().map(|p| p.column.clone()) else {
            return;
        };
        match change {
            FilterChange::SelectAll => self.filters.select_all(&column),
            FilterChange::DeselectAll => self.filters.deselect_all(&column),
            FilterChange::Clear => self.filters.clear_column(&column),
        }
        let state = self.filters.state(&column);
        self.apply_filters();
        self.set_status_message(format!("{column}: {}", describe_state(state)));
    }

    fn sort_current_column(&mut self, ascending: bool) {
        let Some(column_idx) = self.current_column() else {
            return;
        };
        let dataset = &self.dataset;
        self.row_order.sort_by(|&a, &b| {
            let (va, vb) = (dataset.cell(a, column_idx), dataset.cell(b, column_idx));
            let ord = va.sort_cmp(vb);
            // Nulls stay last in both directions
            if ascending || matches!(va, Value::Null) || matches!(vb, Value::Null) {
                ord
            } else {
                ord.reverse()
            }
        });
        let rows: HashSet<usize> = self.table.rows.iter().copied().collect();
        let sorted: Vec<usize> = self
            .row_order
            .iter()
            .copied()
            .filter(|r| rows.contains(r))
            .collect();
        self.table.rows = Arc::new(sorted);
        self.set_status_message(format!(
            "Sorted by {} {}",
            self.columns[column_idx].name,
            if ascending { "ascending" } else { "descending" }
        ));
        self.update_table_data();
    }

    fn select_row(&mut self, row: usize) {
        let column = self.current_column().unwrap_or(0);
        self.select_cell(row, column);
    }

    fn select_cell(&mut self, row: usize, column: usize) {
        let table = &mut self.table;
        trace!("Select record {}:{}", row, column);

        if table.visible_columns.contains(&column) {
            table.curser_column = table
                .visible_columns
                .iter()
                .position(|&c| c == column)
                .unwrap_or(0);
        } else {
            table.offset_column = column;
            table.curser_column = 0;
        }

        let height = table.heigh.max(1);
        if row < table.offset_row {
            table.offset_row = row;
            table.curser_row = 0;
        } else if row >= table.offset_row + height {
            table.offset_row = row + 1 - height;
            table.curser_row = height - 1;
        } else {
            table.curser_row = row - table.offset_row;
        }

        self.update_table_data();
    }

    fn toggle_table_index(&mut self) {
        self.table.show_index = !self.table.show_index;
        // Index width depends on the rows on screen, build it before the layout
        self.table.build_index();
        self.ui_resize(self.uilayout.width, self.uilayout.height);
    }

    fn current_cell(&self) -> Option<(usize, usize)> {
        let row = *self.table.rows.get(self.table.abs_row())?;
        Some((row, self.current_column()?))
    }

    fn set_clipboard(&mut self, content: String) {
        let result = match self.clipboard.as_mut() {
            Some(clipboard) => clipboard.set_text(content).map_err(|e| e.to_string()),
            None => Err("no clipboard".to_string()),
        };
        match result {
            Ok(_) => self.set_status_message("Copied to clipboard"),
            Err(e) => {
                warn!("Error copying to clipboard: {e}");
                self.set_status_message(format!("Could not copy: {e}"));
            }
        }
    }

    fn copy_table_cell(&mut self) {
        if let Some((row, column)) = self.current_cell() {
            let cell = self.dataset.cell(row, column).coerce_to_string();
            trace!("Cell content: {}", cell);
            self.set_clipboard(cell);
        }
    }

    fn copy_table_row(&mut self) {
        if let Some((row, _)) = self.current_cell() {
            let content = (0..self.columns.len())
                .map(|c| wrap_cell_content(&self.dataset.cell(row, c).coerce_to_string()))
                .collect::<Vec<String>>()
                .join(",");
            self.set_clipboard(content);
        }
    }

    fn copy_record_cell(&mut self) {
        let record = &self.record_view;
        if let Some(&row) = self.table.rows.get(record.record_idx) {
            let column = record.curser_offset + record.curser_row;
            let cell = self.dataset.cell(row, column).coerce_to_string();
            self.set_clipboard(cell);
            self.update_record_data();
        }
    }

    fn toggle_column_status(&mut self, toggle_to_expand: bool) {
        let Some(column_idx) = self.current_column() else {
            return;
        };
        let column = &mut self.columns[column_idx];
        column.status = if toggle_to_expand {
            match column.status {
                ColumnStatus::COLLAPSED | ColumnStatus::NORMAL => ColumnStatus::EXPANDED,
                ColumnStatus::EXPANDED => ColumnStatus::COLLAPSED,
            }
        } else {
            match column.status {
                ColumnStatus::COLLAPSED => ColumnStatus::NORMAL,
                ColumnStatus::NORMAL | ColumnStatus::EXPANDED => ColumnStatus::COLLAPSED,
            }
        };
        self.update_table_data();
    }

    fn move_table_selection_up(&mut self, size: usize) {
        let row = self.table.abs_row().saturating_sub(size.max(1));
        self.select_row(row);
    }

    fn move_table_selection_down(&mut self, size: usize) {
        let nrows = self.table.rows.len();
        if nrows == 0 {
            return;
        }
        let row = std::cmp::min(self.table.abs_row() + size.max(1), nrows - 1);
        self.select_row(row);
    }

    fn move_table_selection_left(&mut self) {
        let table = &mut self.table;
        if table.curser_column > 0 {
            table.curser_column -= 1;
        } else if table.offset_column > 0 {
            table.offset_column -= 1;
        }
        self.update_table_data();
    }

    fn move_table_selection_right(&mut self) {
        let ncolumns = self.columns.len();
        let table = &mut self.table;
        if table.curser_column + table.offset_column + 1 < ncolumns {
            if table.curser_column + 1 < table.visible_columns.len() {
                table.curser_column += 1;
            } else {
                // At the end of the screen
                table.offset_column += 1;
            }
            self.update_table_data();
        } else if table.visible_width > table.width && table.offset_column + 1 < ncolumns {
            // Last column is wider than the screen
            table.offset_column += 1;
            self.update_table_data();
        }
    }

    fn move_record_selection_up(&mut self, size: usize) {
        let record = &mut self.record_view;
        if record.curser_row > 0 {
            record.curser_row = record.curser_row.saturating_sub(size);
        } else if record.curser_offset > 0 {
            record.curser_offset = record.curser_offset.saturating_sub(size);
        }
        self.update_record_data();
    }

    fn move_record_selection_down(&mut self, size: usize) {
        let record = &mut self.record_view;
        let total = record.row_data.len();
        if total == 0 {
            return;
        }
        let target = std::cmp::min(record.curser_offset + record.curser_row + size, total - 1);
        let height = record.height.max(1);
        if target >= record.curser_offset + height {
            record.curser_offset = target + 1 - height;
        }
        record.curser_row = target - record.curser_offset;
        self.update_record_data();
    }

    fn previous_record(&mut self) {
        let record = &mut self.record_view;
        record.record_idx = record.record_idx.saturating_sub(1);
        self.update_record_data();
    }

    fn next_record(&mut self) {
        let record = &mut self.record_view;
        if record.record_idx + 1 < self.table.rows.len() {
            record.record_idx += 1;
        }
        self.update_record_data();
    }
}

enum FilterChange {
    SelectAll,
    DeselectAll,
    Clear,
}

fn describe_state(state: FilterState) -> &'static str {
    match state {
        FilterState::Unrestricted => "all values shown",
        FilterState::PartiallyRestricted => "filtered",
        FilterState::FullyExcluding => "every value excluded",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::EMPTY_TOKEN;
    use crate::value::Row;
    use ratatui::crossterm::event::{KeyCode, KeyModifiers};

    fn dataset() -> Dataset {
        let rows: Vec<Row> = [
            ("AIFA-001", "Monto Anteproyecto 2026", "ACTIVO", 1250000.5),
            ("AIFA-002", "Mantenimiento de pista", "VENCIDO", 830000.0),
            ("AIFA-003", "Suministro de combustible 2026", "ACTIVO", 2400000.0),
            ("AIFA-004", "Servicio de limpieza", "", 150000.0),
        ]
        .iter()
        .map(|(folio, concepto, estatus, monto)| {
            [
                ("folio".to_string(), Value::from(*folio)),
                ("concepto".to_string(), Value::from(*concepto)),
                ("estatus".to_string(), Value::from(*estatus)),
                ("monto".to_string(), Value::from(*monto)),
            ]
            .into_iter()
            .collect()
        })
        .collect();
        Dataset::new(
            "contratos",
            ["folio", "concepto", "estatus", "monto"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows,
        )
    }

    fn model() -> Model {
        let mut model = Model::init(&TVConfig::default(), 120, 30);
        model.set_dataset(dataset());
        model
    }

    fn send(model: &mut Model, msg: Message) {
        model.update(Some(msg)).unwrap();
    }

    fn type_keys(model: &mut Model, text: &str) {
        for c in text.chars() {
            send(
                model,
                Message::RawKey(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)),
            );
        }
    }

    fn press(model: &mut Model, code: KeyCode) {
        send(model, Message::RawKey(KeyEvent::new(code, KeyModifiers::NONE)));
    }

    #[test]
    fn loads_everything_visible() {
        let model = model();
        assert_eq!(model.status, Status::READY);
        assert_eq!(model.visible_rows(), &[0, 1, 2, 3]);
        let ui = model.get_uidata();
        assert_eq!(ui.nrows, 4);
        assert_eq!(ui.total_rows, 4);
        assert_eq!(ui.table.len(), 4);
        assert_eq!(ui.table[0].data[0], "AIFA-001");
    }

    #[test]
    fn search_filters_while_typing_and_commits() {
        let mut model = model();
        send(&mut model, Message::Search);
        assert!(model.raw_keyevents());
        type_keys(&mut model, "2026");
        assert_eq!(model.visible_rows(), &[0, 2]);
        type_keys(&mut model, " mont");
        assert_eq!(model.visible_rows(), &[0]);
        press(&mut model, KeyCode::Enter);
        assert!(!model.raw_keyevents());
        assert_eq!(model.query(), "2026 mont");
        assert_eq!(model.get_uidata().nrows, 1);
    }

    #[test]
    fn cancelled_search_restores_previous_query() {
        let mut model = model();
        model.set_query("pista");
        send(&mut model, Message::Search);
        type_keys(&mut model, "zzz");
        assert!(model.visible_rows().is_empty());
        press(&mut model, KeyCode::Esc);
        assert_eq!(model.query(), "pista");
        assert_eq!(model.visible_rows(), &[1]);
    }

    #[test]
    fn filter_popover_toggles_tokens() {
        let mut model = model();
        send(&mut model, Message::MoveRight);
        send(&mut model, Message::MoveRight);
        send(&mut model, Message::OpenFilter);
        assert!(model.is_filter_open());
        assert_eq!(model.listeners().len(), 3);

        let popover = model.get_uidata().filter_popover.clone().unwrap();
        assert_eq!(popover.title, "estatus");
        let labels: Vec<&str> = popover.items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["Activo", "Vacío", "Vencido"]);
        assert!(popover.items.iter().all(|i| i.selected));

        // Deselect "Activo"
        send(&mut model, Message::ToggleOption);
        assert_eq!(model.visible_rows(), &[1, 3]);
        assert_eq!(model.filters().state("estatus"), FilterState::PartiallyRestricted);
        assert_eq!(model.get_uidata().active_filters, 1);
        assert!(model.get_uidata().table[2].filtered);

        // Re-select it, the filter collapses back to unrestricted
        send(&mut model, Message::ToggleOption);
        assert_eq!(model.visible_rows().len(), 4);
        assert_eq!(model.get_uidata().active_filters, 0);

        send(&mut model, Message::DeselectAll);
        assert!(model.visible_rows().is_empty());
        assert_eq!(model.filters().state("estatus"), FilterState::FullyExcluding);
        assert!(model.get_uidata().filter_popover.as_ref().unwrap().items.iter().all(|i| !i.selected));

        send(&mut model, Message::SelectAll);
        assert_eq!(model.visible_rows().len(), 4);

        send(&mut model, Message::ClosePopover);
        assert!(!model.is_filter_open());
        assert!(model.listeners().is_empty());
    }

    #[test]
    fn empty_filter_selection_survives_navigation() {
        let mut model = model();
        model.set_filter("estatus", Some(HashSet::new()));
        for msg in [
            Message::MoveDown,
            Message::MoveEnd,
            Message::MovePageUp,
            Message::Enter,
            Message::CopyCell,
            Message::SortDescending,
        ] {
            send(&mut model, msg);
        }
        assert!(model.visible_rows().is_empty());
        assert_eq!(model.get_uidata().nrows, 0);
    }

    #[test]
    fn filters_and_query_combine_and_clear() {
        let mut model = model();
        model.set_filter(
            "estatus",
            Some([EMPTY_TOKEN.to_string(), "activo".to_string()].into()),
        );
        assert_eq!(model.visible_rows(), &[0, 2, 3]);
        model.set_query("combustible");
        assert_eq!(model.visible_rows(), &[2]);
        send(&mut model, Message::ClearFilters);
        assert_eq!(model.visible_rows().len(), 4);
        assert_eq!(model.query(), "");
    }

    #[test]
    fn sorting_keeps_filtered_subset() {
        let mut model = model();
        model.set_query("2026");
        send(&mut model, Message::MoveToLastColumn);
        send(&mut model, Message::SortDescending);
        assert_eq!(model.visible_rows(), &[2, 0]);
        model.set_query("");
        assert_eq!(model.visible_rows(), &[2, 0, 1, 3]);
    }

    #[test]
    fn record_view_walks_records() {
        let mut model = model();
        send(&mut model, Message::Enter);
        assert_eq!(model.get_uidata().name, "R[contratos]");
        assert_eq!(model.get_uidata().table[1].data[0], "AIFA-001");
        send(&mut model, Message::MoveRight);
        assert_eq!(model.get_uidata().table[1].data[0], "AIFA-002");
        send(&mut model, Message::Exit);
        assert_eq!(model.get_uidata().name, "contratos");
    }

    #[test]
    fn quitting_releases_popover_listeners() {
        let mut model = model();
        send(&mut model, Message::OpenFilter);
        assert!(!model.listeners().is_empty());
        send(&mut model, Message::Quit);
        assert_eq!(model.status, Status::QUITTING);
        assert!(model.listeners().is_empty());
    }

    #[test]
    fn resize_repositions_open_popover() {
        let mut model = model();
        send(&mut model, Message::OpenFilter);
        send(&mut model, Message::Resize(30, 8));
        let area = model.get_uidata().filter_popover.as_ref().unwrap().area;
        assert!(area.right() <= 30);
        assert!(area.bottom() <= 8 - CMDLINE_HEIGH as u16);
    }

    #[test]
    fn wraps_csv_cells() {
        assert_eq!(wrap_cell_content("plain"), "plain");
        assert_eq!(wrap_cell_content("a,b"), "\"a,b\"");
        assert_eq!(wrap_cell_content("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn visible_names_are_shortened_by_chars() {
        assert_eq!(Model::get_visible_name("Señalización", 8), "Señal...");
        assert_eq!(Model::get_visible_name("abc", 2), "");
    }
}
