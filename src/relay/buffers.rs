//! Live pointer -> buffer table fed by the relay connection.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;

use crate::common::Buffer;
use crate::relay::normalize_pointer;

/// Shared buffer table. Readers can wait for a pointer to appear.
#[derive(Debug, Clone)]
pub struct BufferRegistry {
    tx: watch::Sender<HashMap<String, Buffer>>,
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferRegistry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HashMap::new());
        Self { tx }
    }

    /// Replace the whole table (initial listing after connecting).
    pub fn replace_all(&self, buffers: Vec<Buffer>) {
        let table = buffers
            .into_iter()
            .map(|mut buffer| {
                buffer.pointer = normalize_pointer(&buffer.pointer);
                (buffer.pointer.clone(), buffer)
            })
            .collect();
        self.tx.send_replace(table);
    }

    pub fn insert(&self, mut buffer: Buffer) {
        buffer.pointer = normalize_pointer(&buffer.pointer);
        self.tx.send_modify(|table| {
            table.insert(buffer.pointer.clone(), buffer);
        });
    }

    pub fn remove(&self, pointer: &str) {
        let pointer = normalize_pointer(pointer);
        self.tx.send_if_modified(|table| table.remove(&pointer).is_some());
    }

    pub fn get(&self, pointer: &str) -> Option<Buffer> {
        self.tx.borrow().get(&normalize_pointer(pointer)).cloned()
    }

    pub fn list(&self) -> Vec<Buffer> {
        let mut buffers: Vec<Buffer> = self.tx.borrow().values().cloned().collect();
        buffers.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        buffers
    }

    /// Resolve a pointer, waiting up to `timeout` for it to be registered.
    pub async fn wait_for(&self, pointer: &str, timeout: Duration) -> Option<Buffer> {
        let pointer = normalize_pointer(pointer);
        let mut rx = self.tx.subscribe();

        let found = tokio::time::timeout(timeout, rx.wait_for(|table| table.contains_key(&pointer)))
            .await
            .ok()?
            .ok()?
            .get(&pointer)
            .cloned();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(pointer: &str, name: &str) -> Buffer {
        Buffer {
            pointer: pointer.to_string(),
            full_name: name.to_string(),
        }
    }

    #[test]
    fn test_pointers_are_normalized() {
        let registry = BufferRegistry::new();
        registry.insert(buffer("1234", "irc.libera.#rust"));

        assert_eq!(registry.get("0x1234").unwrap().full_name, "irc.libera.#rust");
        assert_eq!(registry.get("1234").unwrap().pointer, "0x1234");

        registry.remove("1234");
        assert!(registry.get("0x1234").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_late_buffer() {
        let registry = BufferRegistry::new();
        let writer = registry.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.insert(buffer("abcd", "irc.libera.nick"));
        });

        let found = registry.wait_for("abcd", Duration::from_secs(5)).await;
        assert_eq!(found.unwrap().full_name, "irc.libera.nick");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let registry = BufferRegistry::new();
        assert!(registry.wait_for("dead", Duration::from_secs(5)).await.is_none());
    }
}
