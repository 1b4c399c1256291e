/*!
# Pilot DevKit - Doublures et utilitaires de test

Bibliothèque facilitant les tests du kernel Pilot :
- Activateur scripté et sonde statique, sans services OS
- Enregistreur des événements du bus
- Harness assemblant registre + coordinateur
*/

pub mod recorder;
pub mod scripted;
pub mod test_utils;

pub use recorder::EventRecorder;
pub use scripted::{Call, CallKind, Outcome, ScriptedActivator, StaticProbe};
pub use test_utils::{init_tracing, TestHarness};
