use bevy::prelude::{App, Plugin};

use crate::executor::Executor;

/// Inserts an [`Executor`] as a non-send resource, so that systems can start coroutines with
/// `NonSend<Executor>` and bind them to entities.
pub struct CoroutinePlugin;

impl Plugin for CoroutinePlugin {
    fn build(&self, app: &mut App) {
        app.insert_non_send_resource(Executor::new());
    }
}
