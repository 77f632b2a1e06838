use serenity::model::id::UserId;
use std::collections::VecDeque;
use tracing::{debug, info};

/// A resolved track ready to be streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub title: String,
    /// Resolved, time-limited media URL handed to the transcoder.
    pub stream_url: String,
    /// Canonical page shown to users.
    pub page_url: String,
    pub requested_by: UserId,
}

/// Per-guild FIFO plus the track currently streaming.
///
/// Invariant: a song leaves `items` exactly when it becomes `current`.
#[derive(Debug, Default)]
pub struct MusicQueue {
    items: VecDeque<Song>,
    current: Option<Song>,
}

impl MusicQueue {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    /// Agrega un track a la cola
    pub fn push(&mut self, song: Song) {
        info!("➕ Agregado a la cola: {}", song.title);
        self.items.push_back(song);
    }

    /// Agrega un lote completo en orden
    pub fn extend(&mut self, songs: Vec<Song>) -> usize {
        let added = songs.len();
        self.items.extend(songs);
        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Pops the head of the queue and makes it the current track.
    pub fn next_track(&mut self) -> Option<Song> {
        let next = self.items.pop_front();
        match &next {
            Some(song) => debug!("➡️ Siguiente en cola (FIFO): {}", song.title),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        self.current = next.clone();
        next
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Drops every queued song and the current track.
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
        info!("🗑️ Cola limpiada");
    }

    pub fn current(&self) -> Option<&Song> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Snapshot for display, limited to the first `limit` upcoming songs.
    pub fn get_info(&self, limit: usize) -> QueueInfo {
        QueueInfo {
            current: self.current.clone(),
            upcoming: self.items.iter().take(limit).cloned().collect(),
            total_items: self.items.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub current: Option<Song>,
    pub upcoming: Vec<Song>,
    pub total_items: usize,
}

impl QueueInfo {
    /// Renders the `/queue` reply.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();

        if let Some(current) = &self.current {
            lines.push(format!("Now playing: **{}**", current.title));
        }

        if !self.upcoming.is_empty() {
            lines.push("Up next:".to_string());
            for (idx, song) in self.upcoming.iter().enumerate() {
                lines.push(format!("{}. {}", idx + 1, song.title));
            }
        }

        if lines.is_empty() {
            lines.push("Queue is empty.".to_string());
        }

        lines.join("\n")
    }
}

#[cfg(test)]
pub(crate) fn song(title: &str) -> Song {
    Song {
        title: title.to_string(),
        stream_url: format!("https://media.example/{}", title),
        page_url: format!("https://www.youtube.com/watch?v={}", title),
        requested_by: UserId::new(1),
    }
}
