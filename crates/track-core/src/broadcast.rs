//! Difusión de actualizaciones a observadores conectados.
//!
//! Componente construido explícitamente en la raíz de composición e inyectado
//! al coordinador (no hay singleton global). La entrega es síncrona y
//! best-effort: sin reintentos, sin garantía de entrega y sin orden entre
//! observadores distintos; dentro de un observador el orden sigue al de
//! `publish`. Un observador cuyo canal se cerró se poda perezosamente en el
//! siguiente `publish` fallido, nunca antes.
use std::sync::mpsc::{channel, Receiver, Sender};

use dashmap::DashMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use track_domain::{Stage, StageLog, Status};

/// Evento de actualización: serial, nuevo par de estado y bitácora completa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub device_serial: String,
    pub stage: Stage,
    pub status: Status,
    pub state_logs: StageLog,
}

/// Handle devuelto por `subscribe`, usado para darse de baja.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberHandle(Uuid);

/// Fan-out de eventos hacia todos los observadores suscritos.
///
/// El registro de suscriptores es un `DashMap`: alta/baja concurrentes son
/// seguras, incluida la remoción durante una publicación en curso.
#[derive(Debug, Default)]
pub struct UpdateBroadcaster {
    subscribers: DashMap<Uuid, Sender<TrackingUpdate>>,
}

impl UpdateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un observador nuevo y devuelve su handle junto al extremo de
    /// lectura del canal.
    pub fn subscribe(&self) -> (SubscriberHandle, Receiver<TrackingUpdate>) {
        let id = Uuid::new_v4();
        let (tx, rx) = channel();
        self.subscribers.insert(id, tx);
        debug!("broadcast:subscribe id={id} total={}", self.subscribers.len());
        (SubscriberHandle(id), rx)
    }

    /// Da de baja un observador. Seguro de llamar más de una vez o después de
    /// que el observador ya se desconectó.
    pub fn unsubscribe(&self, handle: &SubscriberHandle) {
        self.subscribers.remove(&handle.0);
    }

    /// Entrega `event` a cada observador suscripto.
    ///
    /// La falla de entrega a un observador (canal cerrado) se registra y poda
    /// a ese observador; jamás aborta la entrega a los restantes ni propaga un
    /// error al caller.
    pub fn publish(&self, event: &TrackingUpdate) {
        let mut dead: Vec<Uuid> = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_err() {
                warn!("broadcast:dropping disconnected subscriber id={}", entry.key());
                dead.push(*entry.key());
            }
        }
        // Poda fuera de la iteración para no bloquear el shard del mapa.
        for id in dead {
            self.subscribers.remove(&id);
        }
        debug!("broadcast:publish serial={} stage={} status={} subscribers={}",
               event.device_serial,
               event.stage,
               event.status,
               self.subscribers.len());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(serial: &str) -> TrackingUpdate {
        TrackingUpdate { device_serial: serial.to_string(),
                         stage: Stage::Assembly,
                         status: Status::InProgress,
                         state_logs: StageLog::new() }
    }

    #[test]
    fn publish_reaches_every_subscriber_in_order() {
        let broadcaster = UpdateBroadcaster::new();
        let (_h1, rx1) = broadcaster.subscribe();
        let (_h2, rx2) = broadcaster.subscribe();

        broadcaster.publish(&event("A"));
        broadcaster.publish(&event("B"));

        for rx in [&rx1, &rx2] {
            assert_eq!(rx.try_recv().unwrap().device_serial, "A");
            assert_eq!(rx.try_recv().unwrap().device_serial, "B");
        }
    }

    #[test]
    fn dead_subscriber_is_pruned_lazily_and_others_still_receive() {
        let broadcaster = UpdateBroadcaster::new();
        let (_h1, rx1) = broadcaster.subscribe();
        let (_h2, rx2) = broadcaster.subscribe();
        drop(rx1); // el observador se desconectó sin darse de baja

        assert_eq!(broadcaster.subscriber_count(), 2);
        broadcaster.publish(&event("A"));
        // El muerto se podó en el publish fallido; el vivo recibió igual.
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(rx2.try_recv().unwrap().device_serial, "A");
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let broadcaster = UpdateBroadcaster::new();
        let (handle, _rx) = broadcaster.subscribe();
        broadcaster.unsubscribe(&handle);
        broadcaster.unsubscribe(&handle);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
