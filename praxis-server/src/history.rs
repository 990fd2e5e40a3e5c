//! Durable per-round history.
//!
//! Three CSV artifacts live in the output directory, all named by session
//! id: the round history (one row per match/round/seat, with a header set
//! that can grow mid-session), the status snapshot (rewritten after every
//! round), and the chat transcript (append-only). Files that get rewritten
//! are first rotated to a single-generation `.backup`, so the previous copy
//! of round `r` is never lost to a failed rewrite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use log::{info, warn};

use praxis_types::{GroupId, Money, SeatId, SessionParams};

use crate::error::PersistError;
use crate::seats::SeatSnapshot;

/// History data for one seat. Headers and values are per match; the round
/// output map carries columns that appear in the output file but not in the
/// client-facing history table.
#[derive(Debug, Clone, Default)]
pub struct ClientHistory {
    /// `headers[match]` holds the column names for that match.
    pub headers: Vec<Vec<String>>,
    pub practice: Vec<bool>,
    pub group_id: Vec<Option<GroupId>>,
    /// `values[match][round]` holds one display value per header column.
    pub values: Vec<Vec<Vec<String>>>,
    /// `round_output[match][round]` holds extra output columns, keyed by name.
    pub round_output: Vec<Vec<BTreeMap<String, String>>>,
}

impl ClientHistory {
    pub fn new() -> Self {
        ClientHistory::default()
    }

    pub fn start_match(
        &mut self,
        headers: Vec<String>,
        practice: bool,
        group_id: Option<GroupId>,
    ) {
        self.headers.push(headers);
        self.practice.push(practice);
        self.group_id.push(group_id);
        self.values.push(Vec::new());
        self.round_output.push(Vec::new());
    }

    /// Append one round of display values, opening an empty round-output
    /// map that [`add_round_output`](Self::add_round_output) merges into.
    pub fn add_round(&mut self, values: Vec<String>) {
        if let Some(current) = self.values.last_mut() {
            current.push(values);
        }
        if let Some(current) = self.round_output.last_mut() {
            current.push(BTreeMap::new());
        }
    }

    pub fn add_round_output(&mut self, output: BTreeMap<String, String>) {
        if let Some(round) = self
            .round_output
            .last_mut()
            .and_then(|rounds| rounds.last_mut())
        {
            round.extend(output);
        }
    }
}

/// Writes `<sessionID>-history.csv`: one row per round per seat. Each time
/// a match (or a round output) introduces a column the file has not seen,
/// the whole file is rewritten under the new header set, with the previous
/// copy rotated to `.backup`; prior rows carry empty cells in new columns.
pub struct HistoryWriter {
    session_id: String,
    experiment_id: String,
    filename: PathBuf,
    params: SessionParams,
    /// Number of complete matches written.
    matches_written: usize,
    /// Number of rounds written within the current match.
    rounds_written: usize,
    rewrite_needed: bool,
    file_headers: Vec<String>,
    /// Per match: header-column index -> file-column index.
    column_maps: Vec<Vec<usize>>,
    /// Round-output column name -> file-column index.
    column_map_round_output: BTreeMap<String, usize>,
}

impl HistoryWriter {
    pub fn new(
        session_id: &str,
        experiment_id: &str,
        output_dir: &Path,
        params: &SessionParams,
    ) -> Self {
        let mut file_headers: Vec<String> = [
            "sessionID",
            "experimentID",
            "match",
            "practice",
            "exchangeRate",
            "round",
            "subject",
            "group",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        // Custom match parameters become param_-prefixed columns, which
        // keeps them from colliding with controller column names.
        if let Some(first) = params.matches.first() {
            for key in first.custom.keys() {
                file_headers.push(format!("param_{}", key));
            }
        }

        HistoryWriter {
            session_id: session_id.to_string(),
            experiment_id: experiment_id.to_string(),
            filename: output_dir.join(format!("{}-history.csv", session_id)),
            params: params.clone(),
            matches_written: 0,
            rounds_written: 0,
            rewrite_needed: true,
            file_headers,
            column_maps: Vec::new(),
            column_map_round_output: BTreeMap::new(),
        }
    }

    /// Synchronize the output file with the given histories (one per seat,
    /// in seat order). Called once after every round.
    pub fn write(&mut self, histories: &[ClientHistory]) -> Result<(), PersistError> {
        if histories.is_empty() {
            return Ok(());
        }

        // New match headers call for new column maps and a rewrite. The
        // first history is taken as representative; all seats share match
        // structure.
        let headers = &histories[0].headers;
        if headers.len() > self.column_maps.len() {
            self.rewrite_needed = true;
            for m in self.column_maps.len()..headers.len() {
                let mut map = Vec::with_capacity(headers[m].len());
                for header in &headers[m] {
                    match self.file_headers.iter().position(|h| h == header) {
                        Some(pos) => map.push(pos),
                        None => {
                            map.push(self.file_headers.len());
                            self.file_headers.push(header.clone());
                        }
                    }
                }
                self.column_maps.push(map);
            }
        }

        // Round-output columns can also appear mid-match.
        for history in histories {
            for rounds in history.round_output.iter().skip(self.matches_written) {
                for round in rounds {
                    for key in round.keys() {
                        if !self.file_headers.iter().any(|h| h == key) {
                            self.rewrite_needed = true;
                            self.column_map_round_output
                                .insert(key.clone(), self.file_headers.len());
                            self.file_headers.push(key.clone());
                        }
                    }
                }
            }
        }

        if self.rewrite_needed {
            rotate_backup(&self.filename);
            info!("history: writing headers ({} columns)", self.file_headers.len());
            let mut writer = csv::Writer::from_path(&self.filename)?;
            let headers: Vec<String> = self
                .file_headers
                .iter()
                .map(|h| h.split_whitespace().collect::<Vec<_>>().join("_"))
                .collect();
            writer.write_record(&headers)?;
            writer.flush()?;
            self.matches_written = 0;
            self.rounds_written = 0;
        }

        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.filename)?;
        let mut writer = csv::Writer::from_writer(file);

        let total_matches = histories[0].values.len();
        for m in self.matches_written..total_matches {
            if m > self.matches_written {
                self.matches_written += 1;
                self.rounds_written = 0;
            }
            let total_rounds = histories[0].values[m].len();
            for r in self.rounds_written..total_rounds {
                for (seat, history) in histories.iter().enumerate() {
                    writer.write_record(self.build_row(history, seat, m, r))?;
                }
                self.rounds_written += 1;
            }
        }

        writer.flush()?;
        self.rewrite_needed = false;
        Ok(())
    }

    fn build_row(&self, history: &ClientHistory, seat: SeatId, m: usize, r: usize) -> Vec<String> {
        let mut row = vec![String::new(); self.file_headers.len()];
        row[0] = self.session_id.clone();
        row[1] = self.experiment_id.clone();
        row[2] = (m + 1).to_string();
        row[3] = if history.practice.get(m).copied().unwrap_or(false) {
            "1".into()
        } else {
            "0".into()
        };
        if let Some(params) = self.params.matches.get(m) {
            row[4] = params.exchange_rate.to_string();
            for (key, value) in &params.custom {
                let name = format!("param_{}", key);
                if let Some(pos) = self.file_headers.iter().position(|h| h == &name) {
                    row[pos] = value.clone();
                }
            }
        }
        row[5] = (r + 1).to_string();
        row[6] = seat.to_string();
        if let Some(Some(group)) = history.group_id.get(m) {
            row[7] = group.to_string();
        }

        if let Some(values) = history.values.get(m).and_then(|rounds| rounds.get(r)) {
            for (v, value) in values.iter().enumerate() {
                if let Some(&pos) = self.column_maps.get(m).and_then(|map| map.get(v)) {
                    row[pos] = value.clone();
                }
            }
        }
        if let Some(output) = history.round_output.get(m).and_then(|rounds| rounds.get(r)) {
            for (key, value) in output {
                if let Some(&pos) = self.column_map_round_output.get(key) {
                    row[pos] = value.clone();
                }
            }
        }
        row
    }
}

/// Rotate `path` to `path.backup`, dropping any older backup. Absence of
/// the current file is not an error (first write).
fn rotate_backup(path: &Path) {
    let backup = path.with_extension(format!(
        "{}{}",
        path.extension()
            .map(|e| format!("{}.", e.to_string_lossy()))
            .unwrap_or_default(),
        "backup"
    ));
    let _ = std::fs::remove_file(&backup);
    if let Err(e) = std::fs::rename(path, &backup) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("could not back up {}: {}", path.display(), e);
        }
    }
}

/// Rewrite `<sessionID>-status.csv` from the current seat snapshots,
/// rotating the previous copy to `.backup` first.
pub fn write_status(
    output_dir: &Path,
    session_id: &str,
    round_num: usize,
    show_up_payment: Money,
    seats: &[SeatSnapshot],
) -> Result<(), PersistError> {
    let path = output_dir.join(format!("{}-status.csv", session_id));
    rotate_backup(&path);

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record([
        "Round",
        "ID",
        "IP Address",
        "Name",
        "Status",
        "Game Earnings ($)",
        "Rounded Earnings ($)",
        "Show-up Payment ($)",
        "Total Earnings ($)",
    ])?;
    for seat in seats {
        let rounded = seat.rounding.apply(seat.earnings);
        writer.write_record([
            (round_num + 1).to_string(),
            seat.id.to_string(),
            seat.address.clone().unwrap_or_default(),
            seat.name.clone(),
            seat.status.to_string(),
            seat.earnings.to_string(),
            rounded.to_string(),
            show_up_payment.to_string(),
            (rounded + show_up_payment).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One chat transcript row.
#[derive(Debug, Clone)]
pub struct ChatRow {
    pub round: usize,
    pub seat: SeatId,
    pub group: Option<GroupId>,
    pub message: String,
}

/// Append-only chat transcript. Rows accumulate in memory and unwritten
/// ones are appended at each round flush.
pub struct ChatLog {
    path: PathBuf,
    session_id: String,
    experiment_id: String,
    rows: Vec<ChatRow>,
    written: usize,
}

impl ChatLog {
    /// Create the transcript with its header row. Doubles as part of the
    /// output-directory writability probe at session start.
    pub fn create(
        output_dir: &Path,
        session_id: &str,
        experiment_id: &str,
    ) -> Result<Self, PersistError> {
        let path = output_dir.join(format!("{}-chat.csv", session_id));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "sessionID",
            "experimentID",
            "round",
            "subject",
            "group",
            "chatmessage",
        ])?;
        writer.flush()?;
        Ok(ChatLog {
            path,
            session_id: session_id.to_string(),
            experiment_id: experiment_id.to_string(),
            rows: Vec::new(),
            written: 0,
        })
    }

    pub fn append(&mut self, row: ChatRow) {
        self.rows.push(row);
    }

    pub fn flush(&mut self) -> Result<(), PersistError> {
        if self.written == self.rows.len() {
            return Ok(());
        }
        let file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        for row in &self.rows[self.written..] {
            writer.write_record([
                self.session_id.clone(),
                self.experiment_id.clone(),
                (row.round + 1).to_string(),
                row.seat.to_string(),
                row.group.map(|g| g.to_string()).unwrap_or_default(),
                row.message.clone(),
            ])?;
        }
        writer.flush()?;
        self.written = self.rows.len();
        Ok(())
    }
}

/// Time-derived session identifier with per-second resolution, forced
/// monotonically non-decreasing within the process.
pub fn make_session_id() -> String {
    static LAST: OnceLock<Mutex<String>> = OnceLock::new();
    let candidate = chrono::Local::now().format("%y%m%d%H%M%S").to_string();
    let mut last = LAST.get_or_init(|| Mutex::new(String::new())).lock().unwrap();
    if candidate < *last {
        return last.clone();
    }
    *last = candidate.clone();
    candidate
}
