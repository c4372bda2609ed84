use officeflow_core::dispatch::Intent;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::info;

/// Drains the intent channel until every sender is gone. Delivery channels
/// (mail, chat, push) plug in here; for now each intent is logged.
pub fn spawn(mut receiver: UnboundedReceiver<Intent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut delivered = 0_u64;
        while let Some(intent) = receiver.recv().await {
            info!(
                event_name = "intent.delivered",
                intent = intent.name(),
                instance_id = intent.instance_id().0,
                recipient_id = intent.recipient().0,
                "approval intent delivered"
            );
            delivered += 1;
        }
        delivered
    })
}

#[cfg(test)]
mod tests {
    use officeflow_core::dispatch::{ChannelIntentSink, Intent, IntentSink};
    use officeflow_core::domain::directory::UserId;
    use officeflow_core::domain::instance::InstanceId;

    #[tokio::test]
    async fn worker_stops_once_all_senders_are_dropped() {
        let (sink, receiver) = ChannelIntentSink::channel();
        let worker = super::spawn(receiver);

        sink.publish(Intent::Submitted { instance_id: InstanceId(1), recipient: UserId(42) });
        sink.publish(Intent::Cancelled { instance_id: InstanceId(1), recipient: UserId(42) });
        drop(sink);

        assert_eq!(worker.await.expect("worker"), 2);
    }
}
