mod ordering_tests;
mod persistence_tests;
mod presence_tests;
mod reconnect_tests;
mod room_tests;
