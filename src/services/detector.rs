//! Detector: one detection cycle end-to-end.
//!
//! `idle -> debounce check -> (queue when over the concurrency cap) -> running -> merging -> idle`
//!
//! Query runs of different operations may overlap up to `max_concurrent`; merges
//! into the canonical state are serialized by a single mutex. Every operation
//! collects its results into its own map, so overlapping cycles never see each
//! other's intermediate data.

use crate::config::DetectionConfig;
use crate::debug_if_enabled;
use crate::events::{DetectionEvent, RawWindowHandle, WindowRecord};
use crate::services::command_executor::{SourceStats, WindowSource};
use crate::services::state_store::StateStore;
use crate::services::title_parser::{generate_stable_id, TitleParser};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectMode {
    /// Может вернуть текущее состояние, если оно свежее
    Debounced,
    /// Ручное обновление: всегда новый цикл
    Forced,
}

#[derive(Default)]
struct CanonicalState {
    records: HashMap<String, WindowRecord>,
    /// Последнее изменение состояния (цикл или применение атрибутов)
    last_updated: Option<Instant>,
    /// Последний настоящий опрос окон
    last_refresh: Option<Instant>,
    /// Время старта самой новой слитой операции
    last_merged_start: Option<Instant>,
}

impl CanonicalState {
    fn sorted(&self) -> Vec<WindowRecord> {
        let mut windows: Vec<WindowRecord> = self.records.values().cloned().collect();
        windows.sort_by(display_order);
        windows
    }
}

/// Порядок в доке: инициатива по убыванию, затем имя
pub fn display_order(a: &WindowRecord, b: &WindowRecord) -> CmpOrdering {
    b.initiative
        .cmp(&a.initiative)
        .then_with(|| a.display_name().to_lowercase().cmp(&b.display_name().to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Контекст одного вызова detect(): собственная карта промежуточных результатов
struct DetectionOperation {
    id: u64,
    started_at: Instant,
    windows: HashMap<String, WindowRecord>,
}

impl DetectionOperation {
    fn begin(id: u64) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            windows: HashMap::new(),
        }
    }

    /// Дубликаты внутри одного цикла: активное окно важнее, иначе первое
    fn insert(&mut self, record: WindowRecord) {
        match self.windows.get(&record.id) {
            Some(existing) if existing.is_active || !record.is_active => {
                debug_if_enabled!("Дубликат {} в операции #{} пропущен", record.id, self.id);
            }
            _ => {
                self.windows.insert(record.id.clone(), record);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    debounced: AtomicU64,
    queued: AtomicU64,
    rejected: AtomicU64,
    discarded: AtomicU64,
    last_cycle_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStats {
    pub cycles: u64,
    pub debounced: u64,
    pub queued: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub in_flight: usize,
    pub waiting: usize,
    pub last_cycle_ms: u64,
    pub source: SourceStats,
}

pub struct Detector {
    source: Arc<dyn WindowSource>,
    parser: TitleParser,
    store: Arc<StateStore>,
    config: DetectionConfig,
    state: Mutex<CanonicalState>,
    permits: Semaphore,
    waiting: AtomicUsize,
    next_operation: AtomicU64,
    counters: Counters,
}

impl Detector {
    pub fn new(
        source: Arc<dyn WindowSource>,
        parser: TitleParser,
        store: Arc<StateStore>,
        config: DetectionConfig,
    ) -> Self {
        info!(
            "Инициализация Detector (параллельно: {}, очередь: {}, debounce: {}мс, заголовки: {:?})",
            config.max_concurrent,
            config.queue_capacity,
            config.debounce_ms,
            parser.grammar()
        );
        Self {
            source,
            parser,
            store,
            permits: Semaphore::new(config.max_concurrent.max(1)),
            config,
            state: Mutex::new(CanonicalState::default()),
            waiting: AtomicUsize::new(0),
            next_operation: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Цикл детекции с учётом debounce
    pub async fn detect(&self) -> Vec<WindowRecord> {
        self.run_cycle(DetectMode::Debounced).await
    }

    /// Принудительный цикл (ручное обновление, после действия пользователя)
    pub async fn refresh(&self) -> Vec<WindowRecord> {
        self.run_cycle(DetectMode::Forced).await
    }

    /// Текущее каноническое состояние без опроса
    pub async fn snapshot(&self) -> Vec<WindowRecord> {
        self.state.lock().await.sorted()
    }

    pub async fn find(&self, id: &str) -> Option<WindowRecord> {
        self.state.lock().await.records.get(id).cloned()
    }

    /// Повторно применяет сохранённые атрибуты ко всем записям
    /// (после изменения настроек пользователем)
    pub async fn apply_attributes(&self) -> Vec<WindowRecord> {
        let mut state = self.state.lock().await;
        for record in state.records.values_mut() {
            *record = self.store.enrich(record.clone());
        }
        state.last_updated = Some(Instant::now());
        state.sorted()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = CanonicalState::default();
        info!("Каноническое состояние окон очищено");
    }

    pub fn stats(&self) -> DetectorStats {
        let max = self.config.max_concurrent.max(1);
        DetectorStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            debounced: self.counters.debounced.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            in_flight: max.saturating_sub(self.permits.available_permits()),
            waiting: self.waiting.load(Ordering::Relaxed),
            last_cycle_ms: self.counters.last_cycle_ms.load(Ordering::Relaxed),
            source: self.source.stats(),
        }
    }

    fn is_fresh(&self, state: &CanonicalState) -> bool {
        let (Some(updated), Some(refreshed)) = (state.last_updated, state.last_refresh) else {
            return false;
        };
        updated.elapsed() < Duration::from_millis(self.config.debounce_ms)
            && refreshed.elapsed() < Duration::from_millis(self.config.staleness_ms)
    }

    async fn run_cycle(&self, mode: DetectMode) -> Vec<WindowRecord> {
        // 1. Лимит параллельных детекций, лишние ждут в FIFO-очереди семафора
        let _permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
                if queued >= self.config.queue_capacity {
                    self.waiting.fetch_sub(1, Ordering::SeqCst);
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!("Очередь детекции заполнена ({}), возвращаем текущее состояние", queued);
                    return self.snapshot().await;
                }
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                let permit = self.permits.acquire().await;
                self.waiting.fetch_sub(1, Ordering::SeqCst);
                match permit {
                    Ok(permit) => permit,
                    Err(_) => return self.snapshot().await,
                }
            }
        };

        // 2-3. Debounce под блокировкой состояния
        if mode == DetectMode::Debounced {
            let state = self.state.lock().await;
            if self.is_fresh(&state) {
                self.counters.debounced.fetch_add(1, Ordering::Relaxed);
                debug_if_enabled!("Состояние свежее, детекция пропущена");
                return state.sorted();
            }
        }

        // 4. Опрос и разбор в изолированной операции
        let operation_id = self.next_operation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut operation = DetectionOperation::begin(operation_id);
        debug_if_enabled!("Операция детекции #{} начата ({:?})", operation_id, mode);

        let raw = self.source.run().await;
        let valid = self.parser.filter_valid(raw);
        self.collect(&mut operation, valid).await;

        // 5. Слияние
        let windows = {
            let mut state = self.state.lock().await;
            if state
                .last_merged_start
                .is_some_and(|merged| merged > operation.started_at)
            {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug_if_enabled!("Операция #{} устарела, результат отброшен", operation_id);
                return state.sorted();
            }
            self.merge(&mut state, operation.windows, operation.started_at);
            state.sorted()
        };

        let elapsed = operation.started_at.elapsed();
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_cycle_ms
            .store(duration_ms(elapsed), Ordering::Relaxed);
        debug_if_enabled!(
            "Операция #{} завершена за {:?}: {} окон",
            operation_id,
            elapsed,
            windows.len()
        );

        // 6. Уведомление подписчиков полным списком
        self.store.notify(DetectionEvent::new(operation_id, windows.clone()));
        windows
    }

    /// Обработка пачками, чтобы ограничить объём работы за один шаг
    async fn collect(&self, operation: &mut DetectionOperation, valid: Vec<RawWindowHandle>) {
        let batch_delay = Duration::from_millis(self.config.batch_delay_ms);
        for (index, batch) in valid.chunks(self.config.batch_size.max(1)).enumerate() {
            if index > 0 && !batch_delay.is_zero() {
                sleep(batch_delay).await;
            }
            for raw in batch {
                if let Some(record) = self.build_record(raw) {
                    operation.insert(record);
                }
            }
        }
    }

    fn build_record(&self, raw: &RawWindowHandle) -> Option<WindowRecord> {
        let identity = self.parser.parse_title(&raw.title);
        let class = identity.class.filter(|_| identity.valid)?;
        let Some(id) = generate_stable_id(&identity.character, class.key(), raw.process_id) else {
            debug_if_enabled!("Не удалось построить идентификатор для {}", raw);
            return None;
        };
        Some(WindowRecord::detected(id, raw, identity.character, class))
    }

    fn merge(
        &self,
        state: &mut CanonicalState,
        detected: HashMap<String, WindowRecord>,
        started_at: Instant,
    ) {
        let mut merged = HashMap::with_capacity(detected.len());
        let mut created = 0usize;

        for (id, fresh) in detected {
            let record = match state.records.remove(&id) {
                Some(mut existing) => {
                    existing.refresh_presence(&fresh);
                    existing
                }
                None => {
                    created += 1;
                    self.store.enrich(fresh)
                }
            };
            merged.insert(id, record);
        }

        let removed = state.records.len();
        state.records = merged;
        enforce_single_active(&mut state.records);

        let now = Instant::now();
        state.last_updated = Some(now);
        state.last_refresh = Some(now);
        state.last_merged_start = Some(started_at);

        if created > 0 || removed > 0 {
            info!(
                "Окна обновлены: всего {}, новых {}, исчезло {}",
                state.records.len(),
                created,
                removed
            );
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Активным может быть не больше одного окна
fn enforce_single_active(records: &mut HashMap<String, WindowRecord>) {
    let mut active: Vec<String> = records
        .values()
        .filter(|r| r.is_active)
        .map(|r| r.id.clone())
        .collect();
    if active.len() <= 1 {
        return;
    }
    active.sort();
    warn!("Несколько активных окон ({}), оставляем {}", active.len(), active[0]);
    for id in &active[1..] {
        if let Some(record) = records.get_mut(id) {
            record.is_active = false;
        }
    }
}
