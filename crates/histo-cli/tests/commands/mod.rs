mod check_events_test;
mod read_rfid_test;
mod tools_test;
